//! Basic blocks and their instruction dependency DAG.
//!
//! A block is an ordered list of instructions (program order). Each
//! instruction names its parents: the earlier instructions producing its
//! source operands. Edges run producer → consumer, so:
//! - roots have no parents,
//! - terminals are instructions no other instruction depends on,
//! - paths run from a root down to a terminal along consumer edges.

pub mod item;

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use crate::error::{ModelError, Result};

pub use item::{DataItem, TokenLayout};

// ─── Types ────────────────────────────────────────────────────────

/// Operand identifier (register, flag, or memory class) as assigned by
/// whatever decoded the block.
pub type OperandId = u32;

/// A single instruction inside a basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Source operands, in token order.
    pub srcs: Vec<OperandId>,
    /// Destination operands, in token order.
    pub dsts: Vec<OperandId>,
    /// Indices of the instructions producing this one's sources.
    pub parents: Vec<usize>,
}

impl Instruction {
    pub fn new(srcs: Vec<OperandId>, dsts: Vec<OperandId>) -> Self {
        Self {
            srcs,
            dsts,
            parents: Vec::new(),
        }
    }

    pub fn with_parents(mut self, parents: Vec<usize>) -> Self {
        self.parents = parents;
        self
    }
}

/// A validated basic block: non-empty, parents in range, acyclic.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    instrs: Vec<Instruction>,
    children: Vec<Vec<usize>>,
}

// ─── Construction ─────────────────────────────────────────────────

impl BasicBlock {
    /// Build a block from instructions whose `parents` are already filled in.
    ///
    /// Duplicate parent entries are collapsed (first occurrence wins).
    pub fn new(mut instrs: Vec<Instruction>) -> Result<Self> {
        if instrs.is_empty() {
            return Err(ModelError::EmptyBlock);
        }

        let n = instrs.len();
        let mut children = vec![Vec::new(); n];
        for (i, instr) in instrs.iter_mut().enumerate() {
            let mut seen = Vec::with_capacity(instr.parents.len());
            for &p in &instr.parents {
                if p >= n {
                    return Err(ModelError::ParentOutOfRange {
                        instr: i,
                        parent: p,
                    });
                }
                if p == i {
                    return Err(ModelError::SelfDependency(i));
                }
                if !seen.contains(&p) {
                    seen.push(p);
                    children[p].push(i);
                }
            }
            instr.parents = seen;
        }

        check_acyclic(&children)?;
        Ok(Self { instrs, children })
    }

    /// Build a block deriving parent edges from operand def-use order.
    ///
    /// A source operand's producer is the most recent earlier instruction
    /// that lists it as a destination. Operands live on entry to the block
    /// produce no edge. Any `parents` already present are replaced.
    pub fn from_def_use(mut instrs: Vec<Instruction>) -> Result<Self> {
        let mut last_writer: HashMap<OperandId, usize> = HashMap::new();
        for (i, instr) in instrs.iter_mut().enumerate() {
            let mut parents = Vec::new();
            for src in &instr.srcs {
                if let Some(&w) = last_writer.get(src) {
                    if !parents.contains(&w) {
                        parents.push(w);
                    }
                }
            }
            for &dst in &instr.dsts {
                last_writer.insert(dst, i);
            }
            instr.parents = parents;
        }
        Self::new(instrs)
    }
}

fn check_acyclic(children: &[Vec<usize>]) -> Result<()> {
    let mut graph = DiGraph::<(), ()>::with_capacity(children.len(), 0);
    let nodes: Vec<_> = (0..children.len()).map(|_| graph.add_node(())).collect();
    for (producer, consumers) in children.iter().enumerate() {
        for &c in consumers {
            graph.add_edge(nodes[producer], nodes[c], ());
        }
    }
    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| ModelError::CyclicDependency(cycle.node_id().index()))
}

// ─── Queries ──────────────────────────────────────────────────────

impl BasicBlock {
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instrs
    }

    /// # Panics
    ///
    /// If `index >= self.len()`. See [`BasicBlock::get`].
    pub fn instruction(&self, index: usize) -> &Instruction {
        &self.instrs[index]
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instrs.get(index)
    }

    /// Producers of instruction `index`'s sources.
    ///
    /// # Panics
    ///
    /// If `index >= self.len()`.
    pub fn parents(&self, index: usize) -> &[usize] {
        &self.instrs[index].parents
    }

    /// Instructions consuming a value produced by `index`.
    ///
    /// # Panics
    ///
    /// If `index >= self.len()`.
    pub fn children(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    /// Instructions with no parents inside the block.
    pub fn roots(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| self.instrs[i].parents.is_empty())
            .collect()
    }

    /// Instructions that no other instruction in the block depends on.
    pub fn terminal_instructions(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| self.children[i].is_empty())
            .collect()
    }

    /// Every root-to-terminal path, produced lazily.
    ///
    /// Each call returns a fresh iterator, so the enumeration can be
    /// restarted. The number of paths can grow exponentially with the
    /// block's fan-out; nothing is materialised up front.
    pub fn paths(&self) -> Paths<'_> {
        Paths {
            block: self,
            roots: self.roots().into_iter(),
            stack: Vec::new(),
        }
    }
}

/// Depth-first root-to-terminal path iterator over a [`BasicBlock`].
pub struct Paths<'a> {
    block: &'a BasicBlock,
    roots: std::vec::IntoIter<usize>,
    /// (node, index of the next child to descend into)
    stack: Vec<(usize, usize)>,
}

impl Iterator for Paths<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        loop {
            let Some(&(node, cursor)) = self.stack.last() else {
                let root = self.roots.next()?;
                self.stack.push((root, 0));
                continue;
            };

            let children = self.block.children(node);
            if children.is_empty() {
                let path = self.stack.iter().map(|&(n, _)| n).collect();
                self.stack.pop();
                return Some(path);
            }

            if cursor < children.len() {
                if let Some(top) = self.stack.last_mut() {
                    top.1 += 1;
                }
                self.stack.push((children[cursor], 0));
            } else {
                self.stack.pop();
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
