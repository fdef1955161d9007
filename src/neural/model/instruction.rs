//! Instruction encoder: one instruction's token vectors → one hidden row.
//!
//! Two strategies:
//! - pooling: `W_op·opcode + max_s relu(W_src·s) + max_d relu(W_dst·d)`,
//!   an empty operand group contributing zeros,
//! - recurrent: the final hidden state of a token-level cell run over the
//!   whole token sequence from a zero state.

use std::ops::Range;

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

use super::cell::{rows, CellKind, RecurrentCell, RecurrentCellConfig};
use crate::block::{DataItem, TokenLayout};
use crate::error::{ModelError, Result};

#[derive(Config, Debug)]
pub struct InstructionEncoderConfig {
    pub d_embedding: usize,
    pub d_hidden: usize,
    /// Pooling strategy instead of a token-level recurrent cell.
    #[config(default = false)]
    pub pooling: bool,
    #[config(default = "CellKind::Lstm")]
    pub cell: CellKind,
}

impl InstructionEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> InstructionEncoder<B> {
        if self.pooling {
            InstructionEncoder {
                pooling: Some(PoolingEncoder {
                    opcode: LinearConfig::new(self.d_embedding, self.d_hidden).init(device),
                    src: LinearConfig::new(self.d_embedding, self.d_hidden).init(device),
                    dst: LinearConfig::new(self.d_embedding, self.d_hidden).init(device),
                }),
                token_cell: None,
            }
        } else {
            InstructionEncoder {
                pooling: None,
                token_cell: Some(
                    RecurrentCellConfig::new(self.d_embedding, self.d_hidden)
                        .with_kind(self.cell)
                        .init(device),
                ),
            }
        }
    }
}

/// Learned projections for the pooling strategy.
#[derive(Module, Debug)]
pub struct PoolingEncoder<B: Backend> {
    pub(crate) opcode: Linear<B>,
    pub(crate) src: Linear<B>,
    pub(crate) dst: Linear<B>,
}

#[derive(Module, Debug)]
pub struct InstructionEncoder<B: Backend> {
    pub(crate) pooling: Option<PoolingEncoder<B>>,
    pub(crate) token_cell: Option<RecurrentCell<B>>,
}

impl<B: Backend> PoolingEncoder<B> {
    fn encode(&self, tokens: Tensor<B, 2>, layout: TokenLayout) -> Tensor<B, 2> {
        let op = self.opcode.forward(tokens.clone().narrow(0, layout.opcode, 1));
        let src = pool(&self.src, tokens.clone(), layout.srcs, &op);
        let dst = pool(&self.dst, tokens, layout.dsts, &op);
        op + src + dst
    }
}

/// Elementwise max of `relu(lin(row))` over a contiguous row range.
fn pool<B: Backend>(
    lin: &Linear<B>,
    tokens: Tensor<B, 2>,
    range: Range<usize>,
    like: &Tensor<B, 2>,
) -> Tensor<B, 2> {
    if range.is_empty() {
        return like.zeros_like();
    }
    let group = tokens.narrow(0, range.start, range.len());
    relu(lin.forward(group)).max_dim(0)
}

impl<B: Backend> InstructionEncoder<B> {
    /// Encode instruction `index` of `item` from its embedded tokens `[n, d_embedding]`.
    ///
    /// Returns a `[1, d_hidden]` row.
    pub fn encode(&self, item: &DataItem, index: usize, tokens: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        if let Some(pooling) = &self.pooling {
            return Ok(pooling.encode(tokens, item.layout(index)?));
        }

        match &self.token_cell {
            Some(cell) => {
                let init = cell.zero_state(&tokens.device());
                let (_, last) = cell.run(rows(tokens), init);
                Ok(last.hidden)
            }
            None => Err(ModelError::InvalidConfiguration(
                "instruction encoder has no strategy".into(),
            )),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
