use std::path::PathBuf;

use clap::Args;

use super::{fail, load_model, ModelArgs};
use blockcost::NamedParameters;

#[derive(Args)]
pub struct ParamsArgs {
    /// Output parameter file (JSON)
    #[arg(short, long)]
    pub out: PathBuf,
    /// Only export parameters whose name starts with this prefix
    #[arg(long)]
    pub prefix: Option<String>,
    /// List parameter names and shapes instead of only writing the file
    #[arg(long)]
    pub list: bool,
    #[command(flatten)]
    pub model: ModelArgs,
}

pub fn cmd_params(args: ParamsArgs) {
    let model = load_model(&args.model);
    let mut params = model.export_parameters().unwrap_or_else(|e| fail("export", e));
    if let Some(prefix) = &args.prefix {
        params = params.subset(prefix);
    }

    if args.list {
        for name in params.names() {
            if let Some(tensor) = params.get(name) {
                println!("  {} {:?}", name, tensor.shape);
            }
        }
    }

    params
        .save(&args.out)
        .unwrap_or_else(|e| fail(&args.out.display().to_string(), e));
    eprintln!("Wrote {} parameter arrays to {}", params.len(), args.out.display());
}
