//! Hierarchical multi-scale model family.
//!
//! A token-level cell runs over each instruction's token vectors; an
//! instruction-level cell then aggregates the per-instruction results
//! according to the configured [`HierarchyType`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use super::cell::{rows, CellKind, CellState, LearnedState, RecurrentCell, RecurrentCellConfig};
use super::embedding::{EmbeddingMode, PretrainedVectors, TokenEmbedder};
use super::graph::check_sizes;
use super::head::RegressionHead;
use crate::block::DataItem;
use crate::error::{ModelError, Result};
use crate::neural::params::{key, NamedParameters, ParameterSet};
use crate::neural::state::ItemState;

// ─── Hierarchy type ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HierarchyType {
    /// Project the last instruction's final token-level state.
    None,
    /// Every per-token output, in order, through the instruction-level cell.
    Dense,
    /// Each instruction's final token-level output through the instruction-level cell.
    MultiScale,
    /// Sum of the projections of every per-token output.
    LinearModel,
    /// Maximum over root-to-terminal paths of the chained path prediction.
    MopModel,
}

impl FromStr for HierarchyType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "none" => Ok(Self::None),
            "dense" => Ok(Self::Dense),
            "multiscale" => Ok(Self::MultiScale),
            "linear" | "linear-model" => Ok(Self::LinearModel),
            "mop" | "mop-model" => Ok(Self::MopModel),
            _ => Err(ModelError::UnknownHierarchy(s.to_string())),
        }
    }
}

impl fmt::Display for HierarchyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Dense => "dense",
            Self::MultiScale => "multiscale",
            Self::LinearModel => "linear",
            Self::MopModel => "mop",
        };
        write!(f, "{}", name)
    }
}

impl TryFrom<String> for HierarchyType {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HierarchyType> for String {
    fn from(value: HierarchyType) -> Self {
        value.to_string()
    }
}

// ─── Configuration ────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct HierarchicalModelConfig {
    #[config(default = 2048)]
    pub vocab_size: usize,
    #[config(default = 256)]
    pub embedding_size: usize,
    #[config(default = 256)]
    pub hidden_size: usize,
    #[config(default = 1)]
    pub num_classes: usize,
    /// Carry the token-level state from one instruction into the next.
    #[config(default = false)]
    pub connect_tokens: bool,
    /// Add parents' final token-level states into an instruction's seed
    /// state. Only used with [`HierarchyType::None`].
    #[config(default = false)]
    pub skip_connections: bool,
    /// Learned initial states instead of zeros.
    #[config(default = false)]
    pub learn_init: bool,
    #[config(default = "HierarchyType::MultiScale")]
    pub hierarchy: HierarchyType,
    #[config(default = "CellKind::Lstm")]
    pub cell: CellKind,
    #[config(default = "EmbeddingMode::FromScratch")]
    pub embedding: EmbeddingMode,
}

impl HierarchicalModelConfig {
    pub fn validate(&self) -> Result<()> {
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
    ) -> Result<HierarchicalModel<B>> {
        self.validate()?;
        if self.skip_connections && self.hierarchy != HierarchyType::None {
            log::warn!(
                "skip connections only apply to hierarchy `none`; ignored for `{}`",
                self.hierarchy
            );
        }

        let embedding = TokenEmbedder::new(
            self.embedding,
            self.vocab_size,
            self.embedding_size,
            pretrained,
            device,
        )?;
        let learned = |enabled: bool| {
            enabled.then(|| LearnedState::new(self.cell, self.hidden_size, device))
        };

        log::debug!(
            "hierarchical model: hierarchy={} cell={} connect_tokens={} skip={} learn_init={}",
            self.hierarchy,
            self.cell,
            self.connect_tokens,
            self.skip_connections,
            self.learn_init
        );

        Ok(HierarchicalModel {
            embedding,
            token_cell: RecurrentCellConfig::new(self.embedding_size, self.hidden_size)
                .with_kind(self.cell)
                .init(device),
            instr_cell: RecurrentCellConfig::new(self.hidden_size, self.hidden_size)
                .with_kind(self.cell)
                .init(device),
            token_init: learned(self.learn_init),
            instr_init: learned(self.learn_init),
            head: RegressionHead::new(self.hidden_size, self.num_classes, device),
            connect_tokens: self.connect_tokens,
            skip_connections: self.skip_connections && self.hierarchy == HierarchyType::None,
            hierarchy: Ignored(self.hierarchy),
        })
    }
}

// ─── Model ────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct HierarchicalModel<B: Backend> {
    pub(crate) embedding: TokenEmbedder<B>,
    pub(crate) token_cell: RecurrentCell<B>,
    pub(crate) instr_cell: RecurrentCell<B>,
    pub(crate) token_init: Option<LearnedState<B>>,
    pub(crate) instr_init: Option<LearnedState<B>>,
    pub(crate) head: RegressionHead<B>,
    connect_tokens: bool,
    skip_connections: bool,
    hierarchy: Ignored<HierarchyType>,
}

/// Token-level results for one instruction.
#[derive(Debug, Clone)]
pub(crate) struct TokenPass<B: Backend> {
    /// Hidden output after every token.
    pub outputs: Vec<Tensor<B, 2>>,
    /// State after the last token.
    pub last: CellState<B>,
}

impl<B: Backend> HierarchicalModel<B> {
    pub fn hierarchy(&self) -> HierarchyType {
        self.hierarchy.0
    }

    pub fn device(&self) -> B::Device {
        self.head.device()
    }

    pub fn reset_state(&self, item: &DataItem, state: &mut ItemState<B>) {
        state.reset(item.len());
    }

    fn token_init(&self) -> CellState<B> {
        match &self.token_init {
            Some(learned) => learned.state(),
            None => self.token_cell.zero_state(&self.device()),
        }
    }

    fn instr_init(&self) -> CellState<B> {
        match &self.instr_init {
            Some(learned) => learned.state(),
            None => self.instr_cell.zero_state(&self.device()),
        }
    }

    /// Run the token-level cell over every instruction in program order.
    pub(crate) fn token_passes(&self, item: &DataItem, state: &ItemState<B>) -> Result<Vec<TokenPass<B>>> {
        let init = self.token_init();
        let mut passes: Vec<TokenPass<B>> = Vec::with_capacity(item.len());

        for i in 0..item.len() {
            let mut seed = match (self.connect_tokens, passes.last()) {
                (true, Some(prev)) => prev.last.clone(),
                _ => init.clone(),
            };
            if self.skip_connections {
                for &p in item.block.parents(i) {
                    let parent = passes
                        .get(p)
                        .ok_or(ModelError::ParentNotYetComputed { instr: i, parent: p })?;
                    seed = seed.add(parent.last.clone());
                }
            }

            let tokens = state.token_vectors(i).ok_or(ModelError::NoTokens(i))?;
            let (outputs, last) = self.token_cell.run(rows(tokens), seed);
            passes.push(TokenPass { outputs, last });
        }
        Ok(passes)
    }

    /// Instruction-level cell over `chain`, projected.
    fn chain_prediction(&self, chain: Vec<Tensor<B, 2>>) -> Tensor<B, 1> {
        let (_, last) = self.instr_cell.run(chain, self.instr_init());
        self.head.forward(last.hidden)
    }

    pub fn forward_with(&self, item: &DataItem, state: &mut ItemState<B>) -> Result<Tensor<B, 1>> {
        self.reset_state(item, state);
        state.resolve_tokens(item, &self.embedding, &self.device())?;
        let passes = self.token_passes(item, state)?;

        match self.hierarchy() {
            HierarchyType::None => {
                let last = passes.last().ok_or(ModelError::EmptyBlock)?;
                Ok(self.head.forward(last.last.hidden.clone()))
            }
            HierarchyType::Dense => {
                let chain = passes.into_iter().flat_map(|p| p.outputs).collect();
                Ok(self.chain_prediction(chain))
            }
            HierarchyType::MultiScale => {
                let chain = passes.into_iter().map(|p| p.last.hidden).collect();
                Ok(self.chain_prediction(chain))
            }
            HierarchyType::LinearModel => passes
                .into_iter()
                .flat_map(|p| p.outputs)
                .map(|o| self.head.forward(o))
                .reduce(|a, b| a + b)
                .ok_or(ModelError::EmptyBlock),
            HierarchyType::MopModel => {
                let mut count = 0usize;
                let best = item
                    .block
                    .paths()
                    .map(|path| {
                        count += 1;
                        let chain = path.iter().map(|&i| passes[i].last.hidden.clone()).collect();
                        self.chain_prediction(chain)
                    })
                    .reduce(|a, b| a.max_pair(b));
                log::debug!("mop: {} paths over {} instructions", count, item.len());
                best.ok_or(ModelError::EmptyBlock)
            }
        }
    }

    pub fn forward(&self, item: &DataItem) -> Result<Tensor<B, 1>> {
        let mut state = ItemState::for_item(item);
        self.forward_with(item, &mut state)
    }
}

impl<B: Backend> NamedParameters for HierarchicalModel<B> {
    fn export_into(&self, prefix: &str, out: &mut ParameterSet) -> Result<()> {
        self.embedding.export_into(&key(prefix, "embedding"), out)?;
        self.token_cell.export_into(&key(prefix, "token_cell"), out)?;
        self.instr_cell.export_into(&key(prefix, "instr_cell"), out)?;
        if let Some(init) = &self.token_init {
            init.export_into(&key(prefix, "token_init"), out)?;
        }
        if let Some(init) = &self.instr_init {
            init.export_into(&key(prefix, "instr_init"), out)?;
        }
        self.head.export_into(&key(prefix, "head"), out)
    }

    fn import_from(mut self, prefix: &str, params: &ParameterSet, used: &mut BTreeSet<String>) -> Result<Self> {
        self.embedding = self.embedding.import_from(&key(prefix, "embedding"), params, used)?;
        self.token_cell = self.token_cell.import_from(&key(prefix, "token_cell"), params, used)?;
        self.instr_cell = self.instr_cell.import_from(&key(prefix, "instr_cell"), params, used)?;
        self.token_init = self
            .token_init
            .map(|init| init.import_from(&key(prefix, "token_init"), params, used))
            .transpose()?;
        self.instr_init = self
            .instr_init
            .map(|init| init.import_from(&key(prefix, "instr_init"), params, used))
            .transpose()?;
        self.head = self.head.import_from(&key(prefix, "head"), params, used)?;
        Ok(self)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
