//! Sequential residual encoder: instructions in program order, ignoring
//! the dependency graph.

use burn::config::Config;
use burn::module::Module;
use burn::prelude::*;

use super::cell::{CellKind, RecurrentCell, RecurrentCellConfig};
use super::head::RegressionHead;
use super::instruction::{InstructionEncoder, InstructionEncoderConfig};
use crate::block::DataItem;
use crate::error::{ModelError, Result};
use crate::neural::state::ItemState;

#[derive(Config, Debug)]
pub struct SequentialBranchConfig {
    pub d_embedding: usize,
    pub d_hidden: usize,
    pub num_classes: usize,
    #[config(default = false)]
    pub pooling: bool,
    #[config(default = "CellKind::Lstm")]
    pub cell: CellKind,
}

impl SequentialBranchConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SequentialBranch<B> {
        SequentialBranch {
            encoder: InstructionEncoderConfig::new(self.d_embedding, self.d_hidden)
                .with_pooling(self.pooling)
                .with_cell(self.cell)
                .init(device),
            cell: RecurrentCellConfig::new(self.d_hidden, self.d_hidden)
                .with_kind(self.cell)
                .init(device),
            head: RegressionHead::new(self.d_hidden, self.num_classes, device),
        }
    }
}

#[derive(Module, Debug)]
pub struct SequentialBranch<B: Backend> {
    pub(crate) encoder: InstructionEncoder<B>,
    pub(crate) cell: RecurrentCell<B>,
    pub(crate) head: RegressionHead<B>,
}

impl<B: Backend> SequentialBranch<B> {
    /// Final hidden row after running every instruction vector in program
    /// order: `[1, d_hidden]`.
    pub fn block_state(&self, item: &DataItem, state: &ItemState<B>) -> Result<Tensor<B, 2>> {
        let mut instrs = Vec::with_capacity(item.len());
        for i in 0..item.len() {
            let tokens = state.token_vectors(i).ok_or(ModelError::NoTokens(i))?;
            instrs.push(self.encoder.encode(item, i, tokens)?);
        }
        let init = self.cell.zero_state(&self.head.device());
        let (_, last) = self.cell.run(instrs, init);
        Ok(last.hidden)
    }

    pub fn forward(&self, item: &DataItem, state: &ItemState<B>) -> Result<Tensor<B, 1>> {
        Ok(self.head.forward(self.block_state(item, state)?))
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BasicBlock, Instruction};
    use crate::neural::model::embedding::{EmbeddingMode, TokenEmbedder};
    use burn::backend::NdArray;

    type B = NdArray;

    fn values(t: Tensor<B, 2>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    fn setup() -> (DataItem, ItemState<B>, TokenEmbedder<B>) {
        let device = Default::default();
        // dependency edges point backwards; the branch must not care
        let block = BasicBlock::new(vec![
            Instruction::new(vec![], vec![]),
            Instruction::new(vec![], vec![]).with_parents(vec![0]),
            Instruction::new(vec![], vec![]).with_parents(vec![0]),
        ])
        .unwrap();
        let item = DataItem::new(block, vec![vec![1, 2, 3, 4], vec![5, 2], vec![6, 7, 3]]).unwrap();
        let embedder = TokenEmbedder::new(EmbeddingMode::FromScratch, 8, 3, None, &device).unwrap();
        let mut state = ItemState::for_item(&item);
        state.resolve_tokens(&item, &embedder, &device).unwrap();
        (item, state, embedder)
    }

    #[test]
    fn runs_instructions_in_program_order() {
        let device = Default::default();
        let (item, state, embedder) = setup();
        let branch = SequentialBranchConfig::new(3, 5, 1)
            .with_cell(CellKind::Gru)
            .init::<B>(&device);

        let got = branch.block_state(&item, &state).unwrap();

        let mut hidden = branch.cell.zero_state(&device);
        for i in 0..item.len() {
            let tokens = embedder.embed(item.tokens(i), &device).unwrap();
            let x = branch.encoder.encode(&item, i, tokens).unwrap();
            hidden = branch.cell.step(x, hidden);
        }
        assert_eq!(values(got), values(hidden.hidden));
    }

    #[test]
    fn missing_token_vectors_are_reported() {
        let device = Default::default();
        let (item, _, _) = setup();
        let branch = SequentialBranchConfig::new(3, 5, 1).init::<B>(&device);
        let empty = ItemState::for_item(&item);
        assert!(matches!(
            branch.block_state(&item, &empty),
            Err(ModelError::NoTokens(0))
        ));
    }
}
