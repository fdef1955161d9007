pub mod block;
pub mod config;
pub mod error;
pub mod neural;

// Re-exports for the types most callers need
pub use block::{BasicBlock, DataItem, Instruction};
pub use config::ModelConfig;
pub use error::{ModelError, Result};
pub use neural::params::{NamedParameters, ParameterSet};
pub use neural::state::ItemState;
pub use neural::CostModel;
