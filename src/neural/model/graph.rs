//! Graph model family: a DAG branch and a sequential residual branch over
//! one shared token embedding, each with its own instruction encoder and
//! head. With both branches enabled the prediction is the sum of the two
//! projected outputs.

use std::collections::BTreeSet;

use burn::config::Config;
use burn::module::Module;
use burn::prelude::*;

use super::cell::CellKind;
use super::embedding::{EmbeddingMode, PretrainedVectors, TokenEmbedder};
use super::sequential::{SequentialBranch, SequentialBranchConfig};
use crate::block::DataItem;
use crate::error::{ModelError, Result};
use crate::neural::dag::{DagBranch, DagBranchConfig};
use crate::neural::params::{key, NamedParameters, ParameterSet};
use crate::neural::state::ItemState;

// ─── Configuration ────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct GraphModelConfig {
    #[config(default = 2048)]
    pub vocab_size: usize,
    #[config(default = 256)]
    pub embedding_size: usize,
    #[config(default = 256)]
    pub hidden_size: usize,
    #[config(default = 1)]
    pub num_classes: usize,
    /// Sequential residual branch.
    #[config(default = true)]
    pub use_residual: bool,
    /// DAG propagation branch.
    #[config(default = true)]
    pub use_dag: bool,
    /// Pooling instruction encoder instead of the token-level cell.
    #[config(default = false)]
    pub linear_embed: bool,
    #[config(default = "CellKind::Lstm")]
    pub cell: CellKind,
    #[config(default = "EmbeddingMode::FromScratch")]
    pub embedding: EmbeddingMode,
}

impl GraphModelConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.use_dag && !self.use_residual {
            return Err(ModelError::InvalidConfiguration(
                "use_dag and use_residual are both disabled".into(),
            ));
        }
        check_sizes(
            self.vocab_size,
            self.embedding_size,
            self.hidden_size,
            self.num_classes,
        )
    }

    pub fn init<B: Backend>(
        &self,
        pretrained: Option<&PretrainedVectors>,
        device: &B::Device,
    ) -> Result<GraphModel<B>> {
        self.validate()?;
        let embedding = TokenEmbedder::new(
            self.embedding,
            self.vocab_size,
            self.embedding_size,
            pretrained,
            device,
        )?;

        let dag = self.use_dag.then(|| {
            DagBranchConfig::new(self.embedding_size, self.hidden_size, self.num_classes)
                .with_pooling(self.linear_embed)
                .with_cell(self.cell)
                .init(device)
        });
        let residual = self.use_residual.then(|| {
            SequentialBranchConfig::new(self.embedding_size, self.hidden_size, self.num_classes)
                .with_pooling(self.linear_embed)
                .with_cell(self.cell)
                .init(device)
        });

        log::debug!(
            "graph model: dag={} residual={} cell={} embedding={} hidden={}",
            self.use_dag,
            self.use_residual,
            self.cell,
            self.embedding,
            self.hidden_size
        );

        Ok(GraphModel {
            embedding,
            dag,
            residual,
        })
    }
}

pub(crate) fn check_sizes(vocab: usize, embedding: usize, hidden: usize, classes: usize) -> Result<()> {
    for (name, value) in [
        ("vocab_size", vocab),
        ("embedding_size", embedding),
        ("hidden_size", hidden),
        ("num_classes", classes),
    ] {
        if value == 0 {
            return Err(ModelError::InvalidConfiguration(format!("{} must be positive", name)));
        }
    }
    Ok(())
}

// ─── Model ────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct GraphModel<B: Backend> {
    pub(crate) embedding: TokenEmbedder<B>,
    pub(crate) dag: Option<DagBranch<B>>,
    pub(crate) residual: Option<SequentialBranch<B>>,
}

/// The independently projected outputs of each enabled branch.
#[derive(Debug, Clone)]
pub struct BranchOutputs<B: Backend> {
    pub dag: Option<Tensor<B, 1>>,
    pub residual: Option<Tensor<B, 1>>,
}

impl<B: Backend> BranchOutputs<B> {
    pub fn total(self) -> Result<Tensor<B, 1>> {
        match (self.dag, self.residual) {
            (Some(d), Some(r)) => Ok(d + r),
            (Some(x), None) | (None, Some(x)) => Ok(x),
            (None, None) => Err(ModelError::InvalidConfiguration(
                "graph model has no enabled branch".into(),
            )),
        }
    }
}

impl<B: Backend> GraphModel<B> {
    pub fn device(&self) -> B::Device {
        match (&self.dag, &self.residual) {
            (Some(dag), _) => dag.head.device(),
            (None, Some(residual)) => residual.head.device(),
            (None, None) => Default::default(),
        }
    }

    /// Clear all derived per-instruction state held for `item`.
    pub fn reset_state(&self, item: &DataItem, state: &mut ItemState<B>) {
        state.reset(item.len());
    }

    /// Evaluate both branches into `state`, which is reset first.
    pub fn branch_outputs(&self, item: &DataItem, state: &mut ItemState<B>) -> Result<BranchOutputs<B>> {
        self.reset_state(item, state);
        state.resolve_tokens(item, &self.embedding, &self.device())?;

        let dag = self
            .dag
            .as_ref()
            .map(|branch| branch.forward(item, state))
            .transpose()?;
        let residual = self
            .residual
            .as_ref()
            .map(|branch| branch.forward(item, state))
            .transpose()?;
        Ok(BranchOutputs { dag, residual })
    }

    pub fn forward_with(&self, item: &DataItem, state: &mut ItemState<B>) -> Result<Tensor<B, 1>> {
        self.branch_outputs(item, state)?.total()
    }

    /// Prediction for one item: `[num_classes]`.
    pub fn forward(&self, item: &DataItem) -> Result<Tensor<B, 1>> {
        let mut state = ItemState::for_item(item);
        self.forward_with(item, &mut state)
    }
}

impl<B: Backend> NamedParameters for GraphModel<B> {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()> {
        self.embedding.export_into(&key(prefix, "embedding"), out)?;
        if let Some(dag) = &self.dag {
            dag.export_into(&key(prefix, "dag"), out)?;
        }
        if let Some(residual) = &self.residual {
            residual.export_into(&key(prefix, "residual"), out)?;
        }
        Ok(())
    }

    fn import_from(mut self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self> {
        self.embedding = self.embedding.import_from(&key(prefix, "embedding"), params, used)?;
        self.dag = self
            .dag
            .map(|dag| dag.import_from(&key(prefix, "dag"), params, used))
            .transpose()?;
        self.residual = self
            .residual
            .map(|r| r.import_from(&key(prefix, "residual"), params, used))
            .transpose()?;
        Ok(self)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
