//! Whole-model checkpoints.
//!
//! Uses burn's native record format (NamedMpk) at full precision, so a
//! saved model reloads bit-for-bit. burn appends the `.mpk` extension.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

use crate::error::{ModelError, Result};

/// File burn actually writes for `stem`.
pub fn checkpoint_file(stem: &Path) -> PathBuf {
    stem.with_extension("mpk")
}

/// Save a model to `{stem}.mpk`, creating parent directories.
pub fn save_checkpoint<B: Backend, M: Module<B> + Clone>(model: &M, stem: &Path) -> Result<PathBuf> {
    if let Some(dir) = stem.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(stem.to_path_buf(), &recorder)
        .map_err(|e| ModelError::Checkpoint(format!("save {}: {}", stem.display(), e)))?;

    let full_path = checkpoint_file(stem);
    log::debug!("saved checkpoint {}", full_path.display());
    Ok(full_path)
}

/// Load weights from `{stem}.mpk` into `model`.
///
/// Returns `None` if the checkpoint doesn't exist.
pub fn load_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    stem: &Path,
    device: &B::Device,
) -> Result<Option<M>> {
    let full_path = checkpoint_file(stem);
    if !full_path.exists() {
        return Ok(None);
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let loaded = model
        .load_file(stem.to_path_buf(), &recorder, device)
        .map_err(|e| ModelError::Checkpoint(format!("load {}: {}", full_path.display(), e)))?;

    log::debug!("loaded checkpoint {}", full_path.display());
    Ok(Some(loaded))
}
