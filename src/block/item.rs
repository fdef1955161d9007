//! Data items: a basic block paired with its per-instruction token ids.
//!
//! Token layout per instruction:
//! `[opcode, SEP, src_1 .. src_k, SEP, dst_1 .. dst_m, SEP]`
//! where `k` and `m` are the instruction's source and destination counts.

use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{BasicBlock, Instruction, OperandId};
use crate::error::{ModelError, Result};

/// Positions of the opcode, source and destination tokens inside one
/// instruction's token sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLayout {
    pub opcode: usize,
    pub srcs: Range<usize>,
    pub dsts: Range<usize>,
}

impl TokenLayout {
    /// Resolve the layout for an instruction with `srcs` sources and
    /// `dsts` destinations whose token sequence has `len` entries.
    pub fn resolve(instr: usize, len: usize, srcs: usize, dsts: usize) -> Result<Self> {
        if len < srcs + dsts + 4 {
            return Err(ModelError::TokenLayout {
                instr,
                len,
                srcs,
                dsts,
            });
        }
        Ok(Self {
            opcode: 0,
            srcs: 2..2 + srcs,
            dsts: len - 1 - dsts..len - 1,
        })
    }
}

/// One block plus its tokenization, index-aligned with program order.
#[derive(Debug, Clone)]
pub struct DataItem {
    pub block: BasicBlock,
    tokens: Vec<Vec<usize>>,
}

impl DataItem {
    pub fn new(block: BasicBlock, tokens: Vec<Vec<usize>>) -> Result<Self> {
        if tokens.len() != block.len() {
            return Err(ModelError::TokenCountMismatch {
                instrs: block.len(),
                tokens: tokens.len(),
            });
        }
        if let Some(i) = tokens.iter().position(|t| t.is_empty()) {
            return Err(ModelError::NoTokens(i));
        }
        Ok(Self { block, tokens })
    }

    pub fn len(&self) -> usize {
        self.block.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    /// Token ids of instruction `index`.
    ///
    /// # Panics
    ///
    /// If `index >= self.len()`. See [`DataItem::get_tokens`].
    pub fn tokens(&self, index: usize) -> &[usize] {
        &self.tokens[index]
    }

    pub fn get_tokens(&self, index: usize) -> Option<&[usize]> {
        self.tokens.get(index).map(Vec::as_slice)
    }

    pub fn layout(&self, index: usize) -> Result<TokenLayout> {
        let instr = self.block.instruction(index);
        TokenLayout::resolve(
            index,
            self.tokens[index].len(),
            instr.srcs.len(),
            instr.dsts.len(),
        )
    }

    /// Largest token id referenced anywhere in the item.
    pub fn max_token(&self) -> Option<usize> {
        self.tokens.iter().flatten().copied().max()
    }

    /// Parse a data item from its JSON file representation.
    pub fn from_json(text: &str) -> Result<Self> {
        let file: BlockFile = serde_json::from_str(text)?;
        file.into_item()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

// ─── File format ──────────────────────────────────────────────────

/// On-disk shape of one instruction.
///
/// `parents` distinguishes "absent" from an explicit empty list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionEntry {
    pub srcs: Vec<OperandId>,
    pub dsts: Vec<OperandId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<usize>>,
}

/// On-disk shape of a data item.
///
/// When no instruction carries a `parents` field, parent edges are derived
/// from operand def-use order. Otherwise the listed parents are used as
/// given, and a missing field means no parents.
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockFile {
    pub instructions: Vec<InstructionEntry>,
    pub tokens: Vec<Vec<usize>>,
}

impl BlockFile {
    pub fn into_item(self) -> Result<DataItem> {
        let explicit = self.instructions.iter().any(|i| i.parents.is_some());
        let instrs = self
            .instructions
            .into_iter()
            .map(|e| Instruction::new(e.srcs, e.dsts).with_parents(e.parents.unwrap_or_default()))
            .collect();
        let block = if explicit {
            BasicBlock::new(instrs)?
        } else {
            BasicBlock::from_def_use(instrs)?
        };
        log::debug!(
            "loaded block: {} instructions, {} edges ({})",
            block.len(),
            block.instructions().iter().map(|i| i.parents.len()).sum::<usize>(),
            if explicit { "explicit" } else { "def-use" },
        );
        DataItem::new(block, self.tokens)
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_splits_sources_and_destinations() {
        // [op, SEP, s1, s2, SEP, d1, SEP]
        let layout = TokenLayout::resolve(0, 7, 2, 1).unwrap();
        assert_eq!(layout.opcode, 0);
        assert_eq!(layout.srcs, 2..4);
        assert_eq!(layout.dsts, 5..6);
    }

    #[test]
    fn layout_without_operands_is_empty() {
        let layout = TokenLayout::resolve(0, 4, 0, 0).unwrap();
        assert!(layout.srcs.is_empty());
        assert!(layout.dsts.is_empty());
    }

    #[test]
    fn short_token_sequence_is_rejected() {
        let err = TokenLayout::resolve(3, 5, 2, 1).unwrap_err();
        assert!(matches!(err, ModelError::TokenLayout { instr: 3, .. }));
    }

    #[test]
    fn token_count_must_match_instructions() {
        let block = BasicBlock::new(vec![Instruction::new(vec![], vec![])]).unwrap();
        let err = DataItem::new(block, vec![vec![1], vec![2]]).unwrap_err();
        assert!(matches!(
            err,
            ModelError::TokenCountMismatch {
                instrs: 1,
                tokens: 2
            }
        ));
    }

    #[test]
    fn empty_token_sequence_is_rejected() {
        let block = BasicBlock::new(vec![Instruction::new(vec![], vec![])]).unwrap();
        assert!(matches!(
            DataItem::new(block, vec![vec![]]),
            Err(ModelError::NoTokens(0))
        ));
    }

    #[test]
    fn json_without_parents_uses_def_use() {
        let item = DataItem::from_json(
            r#"{
                "instructions": [
                    {"srcs": [], "dsts": [1]},
                    {"srcs": [1], "dsts": [2]}
                ],
                "tokens": [[5, 0, 0, 9, 0], [6, 0, 9, 0, 10, 0]]
            }"#,
        )
        .unwrap();
        assert_eq!(item.block.parents(1), &[0]);
        assert_eq!(item.max_token(), Some(10));
        assert_eq!(item.layout(1).unwrap().dsts, 4..5);
    }

    #[test]
    fn json_with_explicit_parents_is_kept() {
        let item = DataItem::from_json(
            r#"{
                "instructions": [
                    {"srcs": [], "dsts": []},
                    {"srcs": [], "dsts": [], "parents": [0]}
                ],
                "tokens": [[1, 0, 0, 0], [2, 0, 0, 0]]
            }"#,
        )
        .unwrap();
        assert_eq!(item.block.parents(1), &[0]);
    }

    #[test]
    fn explicit_empty_parents_are_not_rederived() {
        // instruction 1 reads operand 1 written by 0, but the file rules the edge out
        let item = DataItem::from_json(
            r#"{
                "instructions": [
                    {"srcs": [], "dsts": [1], "parents": []},
                    {"srcs": [1], "dsts": [2], "parents": []}
                ],
                "tokens": [[5, 0, 0, 9, 0], [6, 0, 9, 0, 10, 0]]
            }"#,
        )
        .unwrap();
        assert!(item.block.parents(1).is_empty());
        assert_eq!(item.block.terminal_instructions(), vec![0, 1]);
    }

    #[test]
    fn token_lookup_out_of_range_is_none() {
        let block = BasicBlock::new(vec![Instruction::new(vec![], vec![])]).unwrap();
        let item = DataItem::new(block, vec![vec![3, 0, 0, 0]]).unwrap();
        assert_eq!(item.get_tokens(0), Some(&[3, 0, 0, 0][..]));
        assert_eq!(item.get_tokens(1), None);
    }
}
