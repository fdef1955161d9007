//! Error type shared by block construction, model construction and evaluation.

use thiserror::Error;

pub type Result<T, E = ModelError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("unknown embedding mode `{0}` (expected from-scratch, seeded or frozen-external)")]
    UnknownEmbeddingMode(String),

    #[error("unknown recurrent cell type `{0}` (expected rnn, lstm or gru)")]
    UnknownCellType(String),

    #[error("unknown hierarchy type `{0}` (expected none, dense, multiscale, linear or mop)")]
    UnknownHierarchy(String),

    #[error("basic block has no instructions")]
    EmptyBlock,

    #[error("instruction {instr} names parent {parent}, which is outside the block")]
    ParentOutOfRange { instr: usize, parent: usize },

    #[error("instruction {0} is outside the block")]
    InstructionOutOfRange(usize),

    #[error("instruction {0} lists itself as a parent")]
    SelfDependency(usize),

    #[error("dependency cycle through instruction {0}")]
    CyclicDependency(usize),

    #[error("data item has {tokens} token sequences for {instrs} instructions")]
    TokenCountMismatch { instrs: usize, tokens: usize },

    #[error(
        "instruction {instr}: {len} tokens cannot hold opcode, {srcs} sources, {dsts} destinations and separators"
    )]
    TokenLayout {
        instr: usize,
        len: usize,
        srcs: usize,
        dsts: usize,
    },

    #[error("instruction {0} has no tokens")]
    NoTokens(usize),

    #[error("token id {token} is outside the vocabulary of {vocab}")]
    TokenOutOfRange { token: usize, vocab: usize },

    #[error("instruction {instr} depends on {parent}, which has not been encoded yet")]
    ParentNotYetComputed { instr: usize, parent: usize },

    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    #[error("parameter `{name}` has shape {found:?}, expected {expected:?}")]
    ParameterShape {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("tensor data: {0}")]
    TensorData(String),

    #[error("checkpoint: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
