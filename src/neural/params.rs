//! Named parameter transfer.
//!
//! Every learnable array gets a stable dotted key (for example
//! `dag.cell.input.weight`). A [`ParameterSet`] can hold any subset of a
//! model's keys; importing replaces exactly the arrays it names and
//! rejects keys the model does not have.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use burn::module::Param;
use burn::nn::Linear;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use super::dag::DagBranch;
use super::model::cell::{LearnedState, RecurrentCell};
use super::model::embedding::TokenEmbedder;
use super::model::head::RegressionHead;
use super::model::instruction::{InstructionEncoder, PoolingEncoder};
use super::model::sequential::SequentialBranch;
use crate::error::{ModelError, Result};

// ─── Parameter set ────────────────────────────────────────────────

/// A raw weight array: row-major values plus shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    entries: BTreeMap<String, ParamTensor>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParamTensor> {
        self.entries.get(name)
    }

    pub fn insert(&mut self, name: String, tensor: ParamTensor) {
        self.entries.insert(name, tensor);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut ParamTensor)> {
        self.entries.iter_mut()
    }

    /// Keep only the entries whose name starts with `prefix`.
    pub fn subset(&self, prefix: &str) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

// ─── Trait ────────────────────────────────────────────────────────

/// Export/import of learnable arrays under stable names.
pub trait NamedParameters: Sized {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()>;

    /// Replace every array named in `params`, recording consumed keys in `used`.
    fn import_from(self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self>;

    fn export_parameters(&self) -> Result<ParameterSet> {
        let mut out = ParameterSet::new();
        self.export_into("", &mut out)?;
        Ok(out)
    }

    fn import_parameters(self, params: &ParameterSet) -> Result<Self> {
        let mut used = BTreeSet::new();
        let imported = self.import_from("", params, &mut used)?;
        if let Some(unknown) = params.names().find(|n| !used.contains(*n)) {
            return Err(ModelError::UnknownParameter(unknown.to_string()));
        }
        log::debug!("imported {} parameter arrays", used.len());
        Ok(imported)
    }
}

pub(crate) fn key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn export_tensor<B: Backend, const D: usize>(
    name: String,
    tensor: Tensor<B, D>,
    out: &mut ParameterSet,
) -> Result<()> {
    let shape = tensor.dims().to_vec();
    let values = tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| ModelError::TensorData(format!("{}: {:?}", name, e)))?;
    out.insert(name, ParamTensor { shape, values });
    Ok(())
}

fn import_tensor<B: Backend, const D: usize>(
    param: Param<Tensor<B, D>>,
    name: String,
    params: &ParameterSet,
    used: &mut BTreeSet<String>,
) -> Result<Param<Tensor<B, D>>> {
    let Some(incoming) = params.get(&name) else {
        return Ok(param);
    };
    let expected = param.dims().to_vec();
    if incoming.shape != expected || incoming.values.len() != expected.iter().product::<usize>() {
        return Err(ModelError::ParameterShape {
            name,
            expected,
            found: incoming.shape.clone(),
        });
    }
    let current = param.val();
    let tensor = Tensor::<B, D>::from_data(
        TensorData::new(incoming.values.clone(), incoming.shape.clone()),
        &current.device(),
    );
    // Keep the id so optimizer state and records stay keyed to this slot.
    let tensor = if current.is_require_grad() {
        tensor.require_grad()
    } else {
        tensor
    };
    used.insert(name);
    Ok(Param::initialized(param.id, tensor))
}

// ─── Leaf modules ─────────────────────────────────────────────────

impl<B: Backend> NamedParameters for Linear<B> {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()> {
        export_tensor(key(prefix, "weight"), self.weight.val(), out)?;
        if let Some(bias) = &self.bias {
            export_tensor(key(prefix, "bias"), bias.val(), out)?;
        }
        Ok(())
    }

    fn import_from(mut self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self> {
        self.weight = import_tensor(self.weight, key(prefix, "weight"), params, used)?;
        self.bias = self
            .bias
            .map(|bias| import_tensor(bias, key(prefix, "bias"), params, used))
            .transpose()?;
        Ok(self)
    }
}

impl<B: Backend> NamedParameters for RecurrentCell<B> {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()> {
        self.input.export_into(&key(prefix, "input"), out)?;
        self.recurrent.export_into(&key(prefix, "recurrent"), out)
    }

    fn import_from(mut self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self> {
        self.input = self.input.import_from(&key(prefix, "input"), params, used)?;
        self.recurrent = self.recurrent.import_from(&key(prefix, "recurrent"), params, used)?;
        Ok(self)
    }
}

impl<B: Backend> NamedParameters for LearnedState<B> {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()> {
        export_tensor(key(prefix, "hidden"), self.hidden.val(), out)?;
        if let Some(cell) = &self.cell {
            export_tensor(key(prefix, "cell"), cell.val(), out)?;
        }
        Ok(())
    }

    fn import_from(mut self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self> {
        self.hidden = import_tensor(self.hidden, key(prefix, "hidden"), params, used)?;
        self.cell = self
            .cell
            .map(|cell| import_tensor(cell, key(prefix, "cell"), params, used))
            .transpose()?;
        Ok(self)
    }
}

/// Frozen-external embeddings have no table and export nothing.
impl<B: Backend> NamedParameters for TokenEmbedder<B> {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()> {
        match &self.table {
            Some(table) => export_tensor(key(prefix, "weight"), table.val(), out),
            None => Ok(()),
        }
    }

    fn import_from(mut self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self> {
        self.table = self
            .table
            .map(|table| import_tensor(table, key(prefix, "weight"), params, used))
            .transpose()?;
        Ok(self)
    }
}

impl<B: Backend> NamedParameters for RegressionHead<B> {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()> {
        self.linear.export_into(prefix, out)
    }

    fn import_from(mut self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self> {
        self.linear = self.linear.import_from(prefix, params, used)?;
        Ok(self)
    }
}

// ─── Composite modules ────────────────────────────────────────────

impl<B: Backend> NamedParameters for PoolingEncoder<B> {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()> {
        self.opcode.export_into(&key(prefix, "opcode"), out)?;
        self.src.export_into(&key(prefix, "src"), out)?;
        self.dst.export_into(&key(prefix, "dst"), out)
    }

    fn import_from(mut self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self> {
        self.opcode = self.opcode.import_from(&key(prefix, "opcode"), params, used)?;
        self.src = self.src.import_from(&key(prefix, "src"), params, used)?;
        self.dst = self.dst.import_from(&key(prefix, "dst"), params, used)?;
        Ok(self)
    }
}

impl<B: Backend> NamedParameters for InstructionEncoder<B> {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()> {
        if let Some(pooling) = &self.pooling {
            pooling.export_into(&key(prefix, "pooling"), out)?;
        }
        if let Some(cell) = &self.token_cell {
            cell.export_into(&key(prefix, "token_cell"), out)?;
        }
        Ok(())
    }

    fn import_from(mut self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self> {
        self.pooling = self
            .pooling
            .map(|p| p.import_from(&key(prefix, "pooling"), params, used))
            .transpose()?;
        self.token_cell = self
            .token_cell
            .map(|c| c.import_from(&key(prefix, "token_cell"), params, used))
            .transpose()?;
        Ok(self)
    }
}

impl<B: Backend> NamedParameters for DagBranch<B> {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()> {
        self.encoder.export_into(&key(prefix, "encoder"), out)?;
        self.cell.export_into(&key(prefix, "cell"), out)?;
        self.head.export_into(&key(prefix, "head"), out)
    }

    fn import_from(mut self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self> {
        self.encoder = self.encoder.import_from(&key(prefix, "encoder"), params, used)?;
        self.cell = self.cell.import_from(&key(prefix, "cell"), params, used)?;
        self.head = self.head.import_from(&key(prefix, "head"), params, used)?;
        Ok(self)
    }
}

impl<B: Backend> NamedParameters for SequentialBranch<B> {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()> {
        self.encoder.export_into(&key(prefix, "encoder"), out)?;
        self.cell.export_into(&key(prefix, "cell"), out)?;
        self.head.export_into(&key(prefix, "head"), out)
    }

    fn import_from(mut self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self> {
        self.encoder = self.encoder.import_from(&key(prefix, "encoder"), params, used)?;
        self.cell = self.cell.import_from(&key(prefix, "cell"), params, used)?;
        self.head = self.head.import_from(&key(prefix, "head"), params, used)?;
        Ok(self)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
