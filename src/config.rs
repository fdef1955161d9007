//! Model configuration files.
//!
//! A config names its family and carries that family's settings:
//!
//! ```json
//! { "family": "graph", "vocab_size": 2048, "use_dag": true, ... }
//! ```

use std::path::Path;
use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, Result};
use crate::neural::model::cell::CellKind;
use crate::neural::model::embedding::{EmbeddingMode, PretrainedVectors};
use crate::neural::model::graph::GraphModelConfig;
use crate::neural::model::hierarchical::{HierarchicalModelConfig, HierarchyType};
use crate::neural::CostModel;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum ModelConfig {
    Graph(GraphModelConfig),
    Hierarchical(HierarchicalModelConfig),
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse and validate a config.
    ///
    /// Unrecognised family, embedding, cell or hierarchy names are reported
    /// as configuration errors, not as JSON syntax errors.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        check_named_fields(&value)?;
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Graph(c) => c.validate(),
            Self::Hierarchical(c) => c.validate(),
        }
    }

    pub fn embedding(&self) -> EmbeddingMode {
        match self {
            Self::Graph(c) => c.embedding,
            Self::Hierarchical(c) => c.embedding,
        }
    }

    /// Whether the embedding mode needs pretrained vectors at construction.
    pub fn needs_vectors(&self) -> bool {
        !matches!(self.embedding(), EmbeddingMode::FromScratch)
    }

    /// Validate and allocate a freshly initialised model.
    pub fn init<B: Backend>(
        &self,
        pretrained: Option<&PretrainedVectors>,
        device: &B::Device,
    ) -> Result<CostModel<B>> {
        Ok(match self {
            Self::Graph(c) => CostModel::Graph(c.init(pretrained, device)?),
            Self::Hierarchical(c) => CostModel::Hierarchical(c.init(pretrained, device)?),
        })
    }
}

fn check_named_fields(value: &Value) -> Result<()> {
    match value.get("family").map(Value::as_str) {
        Some(Some("graph" | "hierarchical")) => {}
        Some(Some(other)) => {
            return Err(ModelError::InvalidConfiguration(format!(
                "unknown model family `{}` (expected graph or hierarchical)",
                other
            )))
        }
        _ => {
            return Err(ModelError::InvalidConfiguration(
                "config needs a string `family` field".into(),
            ))
        }
    }
    check_name::<EmbeddingMode>(value, "embedding")?;
    check_name::<CellKind>(value, "cell")?;
    check_name::<HierarchyType>(value, "hierarchy")
}

fn check_name<T: FromStr<Err = ModelError>>(value: &Value, field: &str) -> Result<()> {
    match value.get(field) {
        None => Ok(()),
        Some(Value::String(name)) => name.parse::<T>().map(|_| ()),
        Some(other) => Err(ModelError::InvalidConfiguration(format!(
            "`{}` must be a name, found {}",
            field, other
        ))),
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::Graph(GraphModelConfig::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn load_text(text: &str) -> Result<ModelConfig> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, text).unwrap();
        ModelConfig::load(&path)
    }

    #[test]
    fn unknown_embedding_mode_in_file_is_typed() {
        assert!(matches!(
            load_text(r#"{"family": "graph", "embedding": "word2vec"}"#),
            Err(ModelError::UnknownEmbeddingMode(name)) if name == "word2vec"
        ));
    }

    #[test]
    fn unknown_cell_type_in_file_is_typed() {
        assert!(matches!(
            load_text(r#"{"family": "graph", "cell": "transformer"}"#),
            Err(ModelError::UnknownCellType(name)) if name == "transformer"
        ));
    }

    #[test]
    fn unknown_hierarchy_in_file_is_typed() {
        assert!(matches!(
            load_text(r#"{"family": "hierarchical", "hierarchy": "tree"}"#),
            Err(ModelError::UnknownHierarchy(_))
        ));
    }

    #[test]
    fn unknown_family_is_a_configuration_error() {
        assert!(matches!(
            load_text(r#"{"family": "transformer"}"#),
            Err(ModelError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            load_text(r#"{"cell": "lstm"}"#),
            Err(ModelError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn legacy_names_are_accepted_in_files() {
        let config = ModelConfig::from_json(
            &serde_json::to_string(&ModelConfig::Graph(GraphModelConfig::new()))
                .unwrap()
                .replace("\"lstm\"", "\"GRU\"")
                .replace("\"from-scratch\"", "\"none\""),
        )
        .unwrap();
        match config {
            ModelConfig::Graph(c) => {
                assert_eq!(c.cell, CellKind::Gru);
                assert_eq!(c.embedding, EmbeddingMode::FromScratch);
            }
            other => panic!("wrong family: {:?}", other),
        }
    }

    #[test]
    fn config_file_round_trips_with_family_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let config = ModelConfig::Hierarchical(
            HierarchicalModelConfig::new().with_hierarchy(HierarchyType::MopModel),
        );
        config.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"family\": \"hierarchical\""));
        assert!(text.contains("\"mop\""));

        match ModelConfig::load(&path).unwrap() {
            ModelConfig::Hierarchical(c) => assert_eq!(c.hierarchy, HierarchyType::MopModel),
            other => panic!("wrong family: {:?}", other),
        }
    }

    #[test]
    fn invalid_config_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        ModelConfig::Graph(
            GraphModelConfig::new()
                .with_use_dag(false)
                .with_use_residual(false),
        )
        .save(&path)
        .unwrap();
        assert!(matches!(
            ModelConfig::load(&path),
            Err(ModelError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn seeded_config_without_vectors_fails_to_init() {
        let config = ModelConfig::Graph(
            GraphModelConfig::new()
                .with_vocab_size(4)
                .with_embedding_size(2)
                .with_hidden_size(2)
                .with_embedding(EmbeddingMode::Seeded),
        );
        assert!(config.needs_vectors());
        assert!(config.init::<NdArray>(None, &Default::default()).is_err());
    }
}
