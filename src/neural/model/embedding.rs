//! Token embedding provider.
//!
//! Three modes, fixed at construction:
//! - from-scratch: learnable table drawn uniformly in ±0.5/width,
//! - seeded: learnable table copied from pretrained vectors,
//! - frozen-external: pretrained vectors looked up directly, never trained.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use burn::module::{Ignored, Module, Param};
use burn::prelude::*;
use burn::tensor::Distribution;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

// ─── Mode ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EmbeddingMode {
    FromScratch,
    Seeded,
    FrozenExternal,
}

impl FromStr for EmbeddingMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "from-scratch" | "none" => Ok(Self::FromScratch),
            "seeded" | "seed" => Ok(Self::Seeded),
            "frozen-external" | "learnt" => Ok(Self::FrozenExternal),
            _ => Err(ModelError::UnknownEmbeddingMode(s.to_string())),
        }
    }
}

impl fmt::Display for EmbeddingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FromScratch => write!(f, "from-scratch"),
            Self::Seeded => write!(f, "seeded"),
            Self::FrozenExternal => write!(f, "frozen-external"),
        }
    }
}

impl TryFrom<String> for EmbeddingMode {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EmbeddingMode> for String {
    fn from(value: EmbeddingMode) -> Self {
        value.to_string()
    }
}

// ─── Pretrained vectors ───────────────────────────────────────────

/// Externally owned token vectors, row `i` belonging to token id `i`.
#[derive(Debug, Clone)]
pub struct PretrainedVectors {
    values: Arc<[f32]>,
    vocab: usize,
    width: usize,
}

impl PretrainedVectors {
    pub fn new(rows: Vec<Vec<f32>>) -> Result<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if width == 0 {
            return Err(ModelError::InvalidConfiguration(
                "pretrained vectors are empty".into(),
            ));
        }
        if let Some(bad) = rows.iter().position(|r| r.len() != width) {
            return Err(ModelError::InvalidConfiguration(format!(
                "pretrained vector {} has width {}, expected {}",
                bad,
                rows[bad].len(),
                width
            )));
        }
        let vocab = rows.len();
        let values: Vec<f32> = rows.into_iter().flatten().collect();
        Ok(Self {
            values: values.into(),
            vocab,
            width,
        })
    }

    pub fn vocab(&self) -> usize {
        self.vocab
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row(&self, token: usize) -> &[f32] {
        &self.values[token * self.width..(token + 1) * self.width]
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let rows: Vec<Vec<f32>> = serde_json::from_str(&text)?;
        Self::new(rows)
    }
}

// ─── Embedder ─────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct TokenEmbedder<B: Backend> {
    /// Learnable table [vocab, width]; absent in frozen-external mode.
    pub(crate) table: Option<Param<Tensor<B, 2>>>,
    frozen: Ignored<Option<PretrainedVectors>>,
    vocab: usize,
    width: usize,
}

impl<B: Backend> TokenEmbedder<B> {
    pub fn new(
        mode: EmbeddingMode,
        vocab: usize,
        width: usize,
        pretrained: Option<&PretrainedVectors>,
        device: &B::Device,
    ) -> Result<Self> {
        match mode {
            EmbeddingMode::FromScratch => {
                if pretrained.is_some() {
                    log::warn!("from-scratch embeddings ignore the supplied pretrained vectors");
                }
                let range = 0.5 / width as f64;
                let table = Tensor::random([vocab, width], Distribution::Uniform(-range, range), device);
                Ok(Self::learnable(table, vocab, width))
            }
            EmbeddingMode::Seeded => {
                let vectors = require_vectors(mode, pretrained, width)?;
                if vectors.vocab() != vocab {
                    return Err(ModelError::InvalidConfiguration(format!(
                        "seed vectors cover {} tokens, vocabulary is {}",
                        vectors.vocab(),
                        vocab
                    )));
                }
                let table = Tensor::<B, 2>::from_data(
                    TensorData::new(vectors.values.to_vec(), [vocab, width]),
                    device,
                );
                Ok(Self::learnable(table, vocab, width))
            }
            EmbeddingMode::FrozenExternal => {
                let vectors = require_vectors(mode, pretrained, width)?;
                if vectors.vocab() != vocab {
                    log::warn!(
                        "frozen vectors cover {} tokens; using that instead of configured vocabulary {}",
                        vectors.vocab(),
                        vocab
                    );
                }
                Ok(Self {
                    table: None,
                    frozen: Ignored(Some(vectors.clone())),
                    vocab: vectors.vocab(),
                    width,
                })
            }
        }
    }

    fn learnable(table: Tensor<B, 2>, vocab: usize, width: usize) -> Self {
        Self {
            table: Some(Param::from_tensor(table)),
            frozen: Ignored(None),
            vocab,
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn vocab(&self) -> usize {
        self.vocab
    }

    /// Look up one vector per token id, preserving order: `[n, width]`.
    pub fn embed(&self, tokens: &[usize], device: &B::Device) -> Result<Tensor<B, 2>> {
        if let Some(&token) = tokens.iter().find(|&&t| t >= self.vocab) {
            return Err(ModelError::TokenOutOfRange {
                token,
                vocab: self.vocab,
            });
        }

        if let Some(table) = &self.table {
            let ids: Vec<i32> = tokens.iter().map(|&t| t as i32).collect();
            let ids = Tensor::<B, 1, Int>::from_data(TensorData::new(ids, [tokens.len()]), device);
            return Ok(table.val().select(0, ids));
        }

        match &self.frozen.0 {
            Some(vectors) => {
                let flat: Vec<f32> = tokens
                    .iter()
                    .flat_map(|&t| vectors.row(t).iter().copied())
                    .collect();
                Ok(Tensor::from_data(
                    TensorData::new(flat, [tokens.len(), self.width]),
                    device,
                ))
            }
            None => Err(ModelError::InvalidConfiguration(
                "embedder has neither a table nor external vectors".into(),
            )),
        }
    }
}

fn require_vectors<'a>(
    mode: EmbeddingMode,
    pretrained: Option<&'a PretrainedVectors>,
    width: usize,
) -> Result<&'a PretrainedVectors> {
    let vectors = pretrained.ok_or_else(|| {
        ModelError::InvalidConfiguration(format!("{} embeddings need pretrained vectors", mode))
    })?;
    if vectors.width() != width {
        return Err(ModelError::InvalidConfiguration(format!(
            "pretrained vectors have width {}, embedding size is {}",
            vectors.width(),
            width
        )));
    }
    Ok(vectors)
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn vectors() -> PretrainedVectors {
        PretrainedVectors::new(vec![
            vec![0.0, 0.1],
            vec![1.0, 1.1],
            vec![2.0, 2.1],
        ])
        .unwrap()
    }

    #[test]
    fn mode_parses_legacy_names() {
        assert_eq!("none".parse::<EmbeddingMode>().unwrap(), EmbeddingMode::FromScratch);
        assert_eq!("seed".parse::<EmbeddingMode>().unwrap(), EmbeddingMode::Seeded);
        assert_eq!("learnt".parse::<EmbeddingMode>().unwrap(), EmbeddingMode::FrozenExternal);
        assert_eq!(
            "frozen-external".parse::<EmbeddingMode>().unwrap(),
            EmbeddingMode::FrozenExternal
        );
    }

    #[test]
    fn unknown_mode_is_an_error() {
        assert!(matches!(
            "word2vec".parse::<EmbeddingMode>(),
            Err(ModelError::UnknownEmbeddingMode(_))
        ));
    }

    #[test]
    fn from_scratch_values_stay_in_range() {
        let device = Default::default();
        let emb = TokenEmbedder::<B>::new(EmbeddingMode::FromScratch, 10, 4, None, &device).unwrap();
        let out = emb.embed(&[0, 3, 9], &device).unwrap();
        assert_eq!(out.dims(), [3, 4]);
        let values = out.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 0.125));
    }

    #[test]
    fn seeded_table_starts_from_vectors() {
        let device = Default::default();
        let v = vectors();
        let emb = TokenEmbedder::<B>::new(EmbeddingMode::Seeded, 3, 2, Some(&v), &device).unwrap();
        assert!(emb.table.is_some());
        let out = emb.embed(&[2, 0], &device).unwrap();
        assert_eq!(out.into_data().to_vec::<f32>().unwrap(), vec![2.0, 2.1, 0.0, 0.1]);
    }

    #[test]
    fn frozen_lookup_has_no_table() {
        let device = Default::default();
        let v = vectors();
        let emb =
            TokenEmbedder::<B>::new(EmbeddingMode::FrozenExternal, 3, 2, Some(&v), &device).unwrap();
        assert!(emb.table.is_none());
        let out = emb.embed(&[1, 1], &device).unwrap();
        assert_eq!(out.into_data().to_vec::<f32>().unwrap(), vec![1.0, 1.1, 1.0, 1.1]);
    }

    #[test]
    fn seeded_without_vectors_is_rejected() {
        let device = Default::default();
        let err = TokenEmbedder::<B>::new(EmbeddingMode::Seeded, 3, 2, None, &device).unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfiguration(_)));
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let device = Default::default();
        let v = vectors();
        let err =
            TokenEmbedder::<B>::new(EmbeddingMode::FrozenExternal, 3, 5, Some(&v), &device).unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfiguration(_)));
    }

    #[test]
    fn out_of_range_token_is_rejected() {
        let device = Default::default();
        let emb = TokenEmbedder::<B>::new(EmbeddingMode::FromScratch, 4, 2, None, &device).unwrap();
        assert!(matches!(
            emb.embed(&[1, 4], &device),
            Err(ModelError::TokenOutOfRange { token: 4, vocab: 4 })
        ));
    }

    #[test]
    fn ragged_vectors_are_rejected() {
        assert!(PretrainedVectors::new(vec![vec![1.0, 2.0], vec![3.0]]).is_err());
    }
}
