//! Neural cost models for basic blocks.
//!
//! Two model families share the token embedding and recurrent cells:
//! the graph family (DAG propagation plus a sequential residual branch)
//! and the hierarchical multi-scale family.
//!
//! # Public API
//!
//! ```ignore
//! use blockcost::neural::CostModel;
//! let model = config.init::<NdArray>(None, &device)?;
//! let cycles = model.predict(&item)?;
//! ```

pub mod checkpoint;
pub mod dag;
pub mod model;
pub mod params;
pub mod state;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use burn::prelude::*;

use crate::block::DataItem;
use crate::error::{ModelError, Result};
use model::graph::GraphModel;
use model::hierarchical::HierarchicalModel;
use params::{NamedParameters, ParameterSet};
use state::ItemState;

/// Either model family behind one interface.
#[derive(Debug, Clone)]
pub enum CostModel<B: Backend> {
    Graph(GraphModel<B>),
    Hierarchical(HierarchicalModel<B>),
}

impl<B: Backend> CostModel<B> {
    pub fn family(&self) -> &'static str {
        match self {
            Self::Graph(_) => "graph",
            Self::Hierarchical(_) => "hierarchical",
        }
    }

    /// Clear all derived per-instruction state held for `item`.
    pub fn reset_state(&self, item: &DataItem, state: &mut ItemState<B>) {
        match self {
            Self::Graph(m) => m.reset_state(item, state),
            Self::Hierarchical(m) => m.reset_state(item, state),
        }
    }

    /// Evaluate `item`, reusing `state`'s storage. `state` is reset first.
    pub fn forward_with(&self, item: &DataItem, state: &mut ItemState<B>) -> Result<Tensor<B, 1>> {
        match self {
            Self::Graph(m) => m.forward_with(item, state),
            Self::Hierarchical(m) => m.forward_with(item, state),
        }
    }

    pub fn forward(&self, item: &DataItem) -> Result<Tensor<B, 1>> {
        let mut state = ItemState::for_item(item);
        self.forward_with(item, &mut state)
    }

    /// Prediction as plain floats.
    pub fn predict(&self, item: &DataItem) -> Result<Vec<f32>> {
        self.forward(item)?
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ModelError::TensorData(format!("{:?}", e)))
    }

    pub fn save(&self, stem: &Path) -> Result<PathBuf> {
        match self {
            Self::Graph(m) => checkpoint::save_checkpoint::<B, _>(m, stem),
            Self::Hierarchical(m) => checkpoint::save_checkpoint::<B, _>(m, stem),
        }
    }

    /// Load weights from a checkpoint, or `None` if it doesn't exist.
    pub fn load(self, stem: &Path, device: &B::Device) -> Result<Option<Self>> {
        Ok(match self {
            Self::Graph(m) => checkpoint::load_checkpoint(m, stem, device)?.map(Self::Graph),
            Self::Hierarchical(m) => {
                checkpoint::load_checkpoint(m, stem, device)?.map(Self::Hierarchical)
            }
        })
    }
}

impl<B: Backend> NamedParameters for CostModel<B> {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()> {
        match self {
            Self::Graph(m) => m.export_into(prefix, out),
            Self::Hierarchical(m) => m.export_into(prefix, out),
        }
    }

    fn import_from(self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self> {
        Ok(match self {
            Self::Graph(m) => Self::Graph(m.import_from(prefix, params, used)?),
            Self::Hierarchical(m) => Self::Hierarchical(m.import_from(prefix, params, used)?),
        })
    }
}
