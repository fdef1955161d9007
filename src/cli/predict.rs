use std::path::PathBuf;

use clap::Args;

use super::{fail, load_item, load_model, ModelArgs};

#[derive(Args)]
pub struct PredictArgs {
    /// Data item JSON: instructions plus per-instruction token ids
    pub item: PathBuf,
    #[command(flatten)]
    pub model: ModelArgs,
}

pub fn cmd_predict(args: PredictArgs) {
    let item = load_item(&args.item);
    let model = load_model(&args.model);

    eprintln!(
        "Predicting {} ({} instructions, {} model)",
        args.item.display(),
        item.len(),
        model.family()
    );

    let prediction = model.predict(&item).unwrap_or_else(|e| fail("predict", e));
    let rendered: Vec<String> = prediction.iter().map(|v| format!("{:.4}", v)).collect();
    println!("{}", rendered.join(" "));
}
