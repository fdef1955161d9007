pub mod cell;
pub mod embedding;
pub mod graph;
pub mod head;
pub mod hierarchical;
pub mod instruction;
pub mod sequential;
