//! Per-item derived state for one forward evaluation.
//!
//! Holds the memoized per-instruction DAG states and the embedded token
//! vectors. It is owned by the caller rather than by the instructions, so
//! concurrent evaluations of different items each get their own table and
//! a reset is just clearing it.

use burn::prelude::*;

use super::dag::StateMemo;
use super::model::cell::CellState;
use super::model::embedding::TokenEmbedder;
use crate::block::DataItem;
use crate::error::Result;

#[derive(Debug)]
pub struct ItemState<B: Backend> {
    pub(crate) memo: StateMemo<CellState<B>>,
    pub(crate) tokens: Vec<Option<Tensor<B, 2>>>,
    pub(crate) dag_steps: usize,
}

impl<B: Backend> ItemState<B> {
    pub fn new(len: usize) -> Self {
        Self {
            memo: StateMemo::new(len),
            tokens: (0..len).map(|_| None).collect(),
            dag_steps: 0,
        }
    }

    pub fn for_item(item: &DataItem) -> Self {
        Self::new(item.len())
    }

    /// Clear every cached per-instruction state. Safe to call repeatedly.
    pub fn reset(&mut self, len: usize) {
        self.memo.reset(len);
        self.tokens.clear();
        self.tokens.resize_with(len, || None);
        self.dag_steps = 0;
    }

    /// Recurrent-cell steps taken by the DAG branch since the last reset.
    pub fn dag_steps(&self) -> usize {
        self.dag_steps
    }

    /// Instructions whose DAG state is currently memoized.
    pub fn memoized(&self) -> usize {
        self.memo.filled()
    }

    /// Instructions whose token vectors are currently cached.
    pub fn cached_tokens(&self) -> usize {
        self.tokens.iter().filter(|t| t.is_some()).count()
    }

    /// Embed every instruction's tokens into the cache.
    pub fn resolve_tokens(
        &mut self,
        item: &DataItem,
        embedder: &TokenEmbedder<B>,
        device: &B::Device,
    ) -> Result<()> {
        for i in 0..item.len() {
            self.tokens[i] = Some(embedder.embed(item.tokens(i), device)?);
        }
        Ok(())
    }

    pub(crate) fn token_vectors(&self, index: usize) -> Option<Tensor<B, 2>> {
        self.tokens.get(index).cloned().flatten()
    }
}
