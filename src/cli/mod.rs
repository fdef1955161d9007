pub mod params;
pub mod paths;
pub mod predict;

use std::path::{Path, PathBuf};
use std::process;

use burn::backend::NdArray;
use clap::Args;

use blockcost::neural::model::embedding::PretrainedVectors;
use blockcost::{CostModel, DataItem, ModelConfig, NamedParameters, ParameterSet};

/// CPU backend used by every command.
pub type Cpu = NdArray;

/// Where a model comes from: a config plus optional weights.
#[derive(Args)]
pub struct ModelArgs {
    /// Model config JSON (default: graph model with default sizes)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Pretrained token vectors (JSON array of rows) for seeded or frozen embeddings
    #[arg(long, value_name = "PATH")]
    pub vectors: Option<PathBuf>,
    /// Whole-model checkpoint stem (burn appends .mpk)
    #[arg(long, value_name = "PATH")]
    pub checkpoint: Option<PathBuf>,
    /// Named parameter file to import after loading
    #[arg(long, value_name = "PATH")]
    pub params: Option<PathBuf>,
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("error: {}: {}", context, err);
    process::exit(1);
}

pub fn load_item(path: &Path) -> DataItem {
    DataItem::load(path).unwrap_or_else(|e| fail(&path.display().to_string(), e))
}

/// Build the model described by `args`, applying checkpoint and parameter files.
pub fn load_model(args: &ModelArgs) -> CostModel<Cpu> {
    let device = Default::default();
    let config = match &args.config {
        Some(path) => {
            ModelConfig::load(path).unwrap_or_else(|e| fail(&path.display().to_string(), e))
        }
        None => ModelConfig::default(),
    };

    let vectors = match &args.vectors {
        Some(path) => Some(
            PretrainedVectors::load(path).unwrap_or_else(|e| fail(&path.display().to_string(), e)),
        ),
        None => {
            if config.needs_vectors() {
                fail("config", format!("{} embeddings need --vectors", config.embedding()));
            }
            None
        }
    };

    let mut model = config
        .init::<Cpu>(vectors.as_ref(), &device)
        .unwrap_or_else(|e| fail("model", e));

    if let Some(stem) = &args.checkpoint {
        model = match model.load(stem, &device) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => fail(&stem.display().to_string(), "checkpoint not found"),
            Err(e) => fail(&stem.display().to_string(), e),
        };
    }

    if let Some(path) = &args.params {
        let params =
            ParameterSet::load(path).unwrap_or_else(|e| fail(&path.display().to_string(), e));
        eprintln!("Importing {} parameter arrays from {}", params.len(), path.display());
        model = model
            .import_parameters(&params)
            .unwrap_or_else(|e| fail(&path.display().to_string(), e));
    }

    model
}
