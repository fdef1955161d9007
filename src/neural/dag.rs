//! DAG propagation engine.
//!
//! Computes one state per instruction by combining the states of its
//! parents and feeding the result, together with the instruction's own
//! vector, through a recurrent cell. States are memoized in a table owned
//! by the caller, so every instruction is stepped exactly once per
//! evaluation no matter how many dependents it has.
//!
//! Traversal is an explicit-stack post-order walk over parent edges; the
//! depth of the dependency chain never touches the native call stack.

use burn::config::Config;
use burn::module::Module;
use burn::prelude::*;

use super::model::cell::{CellKind, CellState, RecurrentCell, RecurrentCellConfig};
use super::model::head::RegressionHead;
use super::model::instruction::{InstructionEncoder, InstructionEncoderConfig};
use super::state::ItemState;
use crate::block::{BasicBlock, DataItem};
use crate::error::{ModelError, Result};

// ─── Memo table ───────────────────────────────────────────────────

/// Per-instruction memoization slots for one evaluation of one block.
#[derive(Debug, Clone)]
pub struct StateMemo<S> {
    slots: Vec<Option<S>>,
}

impl<S> StateMemo<S> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&S> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn is_memoized(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Empty every slot and resize to `len`. Idempotent.
    pub fn reset(&mut self, len: usize) {
        self.slots.clear();
        self.slots.resize_with(len, || None);
    }
}

// ─── Reduction ────────────────────────────────────────────────────

/// Fold states with a symmetric, associative `combine`.
///
/// Returns `None` for an empty input.
pub fn reduce_states<S>(states: impl IntoIterator<Item = S>, combine: impl FnMut(S, S) -> S) -> Option<S> {
    states.into_iter().reduce(combine)
}

// ─── Traversal ────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Compute the states of `targets` and everything upstream of them.
///
/// `step(index, combined_parents)` produces an instruction's state;
/// `combined_parents` is `None` for an instruction without parents.
/// Instructions already present in `memo` are reused, not recomputed.
/// Returns the target states in the order given.
pub fn propagate<S, C, F>(
    block: &BasicBlock,
    targets: &[usize],
    memo: &mut StateMemo<S>,
    mut combine: C,
    mut step: F,
) -> Result<Vec<S>>
where
    S: Clone,
    C: FnMut(S, S) -> S,
    F: FnMut(usize, Option<S>) -> Result<S>,
{
    let n = block.len();
    if memo.slots.len() != n {
        memo.reset(n);
    }

    let mut marks = vec![Mark::Unvisited; n];
    for (i, mark) in marks.iter_mut().enumerate() {
        if memo.is_memoized(i) {
            *mark = Mark::Done;
        }
    }

    // (node, parents already expanded)
    let mut stack: Vec<(usize, bool)> = Vec::new();
    for &target in targets {
        if target >= n {
            return Err(ModelError::InstructionOutOfRange(target));
        }
        stack.push((target, false));

        while let Some((node, expanded)) = stack.pop() {
            if marks[node] == Mark::Done {
                continue;
            }

            if !expanded {
                marks[node] = Mark::InProgress;
                stack.push((node, true));
                for &p in block.parents(node).iter().rev() {
                    match marks[p] {
                        Mark::Done => {}
                        Mark::InProgress => return Err(ModelError::CyclicDependency(p)),
                        Mark::Unvisited => stack.push((p, false)),
                    }
                }
                continue;
            }

            let parents = block
                .parents(node)
                .iter()
                .filter_map(|&p| memo.get(p).cloned());
            let combined = reduce_states(parents, &mut combine);
            log::trace!(
                "dag step: instr {} ({} parents)",
                node,
                block.parents(node).len()
            );
            let state = step(node, combined)?;
            memo.slots[node] = Some(state);
            marks[node] = Mark::Done;
        }
    }

    targets
        .iter()
        .map(|&t| {
            memo.get(t)
                .cloned()
                .ok_or(ModelError::CyclicDependency(t))
        })
        .collect()
}

// ─── DAG branch ───────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct DagBranchConfig {
    pub d_embedding: usize,
    pub d_hidden: usize,
    pub num_classes: usize,
    #[config(default = false)]
    pub pooling: bool,
    #[config(default = "CellKind::Lstm")]
    pub cell: CellKind,
}

impl DagBranchConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DagBranch<B> {
        DagBranch {
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

/// Graph branch: instruction encoder + DAG cell + projection.
#[derive(Module, Debug)]
pub struct DagBranch<B: Backend> {
    pub(crate) encoder: InstructionEncoder<B>,
    pub(crate) cell: RecurrentCell<B>,
    pub(crate) head: RegressionHead<B>,
}

impl<B: Backend> DagBranch<B> {
    /// Block-level graph state: elementwise max of the terminal
    /// instructions' hidden rows, `[1, d_hidden]`.
    pub fn block_state(&self, item: &DataItem, state: &mut ItemState<B>) -> Result<Tensor<B, 2>> {
        let device = self.head.device();
        let init = self.cell.zero_state(&device);
        let terminals = item.block.terminal_instructions();

        let ItemState {
            memo,
            tokens,
            dag_steps,
        } = state;

        let finals = propagate(&item.block, &terminals, memo, CellState::max, |i, parents| {
            let embedded = tokens
                .get(i)
                .cloned()
                .flatten()
                .ok_or(ModelError::NoTokens(i))?;
            let x = self.encoder.encode(item, i, embedded)?;
            *dag_steps += 1;
            Ok(self.cell.step(x, parents.unwrap_or_else(|| init.clone())))
        })?;

        log::debug!(
            "dag: {} instructions, {} terminals, {} cell steps",
            item.len(),
            terminals.len(),
            dag_steps
        );

        reduce_states(finals.into_iter().map(|s| s.hidden), |a, b| a.max_pair(b))
            .ok_or(ModelError::EmptyBlock)
    }

    pub fn forward(&self, item: &DataItem, state: &mut ItemState<B>) -> Result<Tensor<B, 1>> {
        Ok(self.head.forward(self.block_state(item, state)?))
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Instruction;
    use burn::backend::NdArray;

    type B = NdArray;

    fn block(parents: Vec<Vec<usize>>) -> BasicBlock {
        BasicBlock::new(
            parents
                .into_iter()
                .map(|p| Instruction::new(vec![], vec![]).with_parents(p))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn shared_parent_is_stepped_once() {
        // 0 feeds 1, 2 and 3; 3 also reads 1 and 2
        let block = block(vec![vec![], vec![0], vec![0], vec![0, 1, 2]]);
        let mut memo = StateMemo::new(block.len());
        let mut calls = vec![0usize; block.len()];

        propagate(&block, &[3], &mut memo, |a: u32, b| a.max(b), |i, parents| {
            calls[i] += 1;
            Ok(parents.unwrap_or(0) + 1)
        })
        .unwrap();

        assert_eq!(calls, vec![1, 1, 1, 1]);
    }

    #[test]
    fn depth_is_longest_parent_chain() {
        let block = block(vec![vec![], vec![0], vec![1], vec![0], vec![2, 3]]);
        let mut memo = StateMemo::new(block.len());
        let out = propagate(&block, &[4], &mut memo, |a: u32, b| a.max(b), |_, p| {
            Ok(p.unwrap_or(0) + 1)
        })
        .unwrap();
        assert_eq!(out, vec![4]);
        assert_eq!(memo.get(3), Some(&2));
    }

    #[test]
    fn multiple_targets_share_the_memo() {
        let block = block(vec![vec![], vec![0], vec![0]]);
        let mut memo = StateMemo::new(block.len());
        let mut steps = 0;
        let out = propagate(&block, &[1, 2], &mut memo, |a: u32, b| a.max(b), |_, p| {
            steps += 1;
            Ok(p.unwrap_or(0) + 1)
        })
        .unwrap();
        assert_eq!(out, vec![2, 2]);
        assert_eq!(steps, 3);
    }

    #[test]
    fn memoized_states_are_not_recomputed() {
        let block = block(vec![vec![], vec![0]]);
        let mut memo = StateMemo::new(block.len());
        propagate(&block, &[1], &mut memo, |a: u32, b| a.max(b), |_, p| Ok(p.unwrap_or(0) + 1)).unwrap();

        let mut steps = 0;
        propagate(&block, &[1], &mut memo, |a: u32, b| a.max(b), |_, p| {
            steps += 1;
            Ok(p.unwrap_or(0) + 1)
        })
        .unwrap();
        assert_eq!(steps, 0);

        memo.reset(block.len());
        memo.reset(block.len());
        assert_eq!(memo.filled(), 0);
    }

    #[test]
    fn long_chain_does_not_exhaust_the_stack() {
        let n = 100_000;
        let block = block((0..n).map(|i| if i == 0 { vec![] } else { vec![i - 1] }).collect());
        let mut memo = StateMemo::new(n);
        let out = propagate(&block, &[n - 1], &mut memo, |a: u64, b| a.max(b), |_, p| {
            Ok(p.unwrap_or(0) + 1)
        })
        .unwrap();
        assert_eq!(out, vec![n as u64]);
    }

    #[test]
    fn step_errors_propagate() {
        let block = block(vec![vec![], vec![0]]);
        let mut memo = StateMemo::new(block.len());
        let err = propagate(&block, &[1], &mut memo, |a: u32, b| a.max(b), |i, _| {
            if i == 0 {
                Err(ModelError::NoTokens(0))
            } else {
                Ok(1)
            }
        })
        .unwrap_err();
        assert!(matches!(err, ModelError::NoTokens(0)));
    }

    #[test]
    fn parent_combination_is_order_independent() {
        let device = Default::default();
        let states: Vec<CellState<B>> = (0..4)
            .map(|_| CellState {
                hidden: Tensor::random([1, 8], burn::tensor::Distribution::Default, &device),
                cell: Some(Tensor::random([1, 8], burn::tensor::Distribution::Default, &device)),
            })
            .collect();

        let combine = |order: &[usize]| {
            let s = reduce_states(order.iter().map(|&i| states[i].clone()), CellState::max).unwrap();
            (
                s.hidden.into_data().to_vec::<f32>().unwrap(),
                s.cell.unwrap().into_data().to_vec::<f32>().unwrap(),
            )
        };

        let reference = combine(&[0, 1, 2, 3]);
        for order in [[3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]] {
            assert_eq!(combine(&order), reference, "order {:?}", order);
        }
    }

    #[test]
    fn empty_reduction_is_none() {
        assert!(reduce_states(Vec::<u32>::new(), |a, b| a.max(b)).is_none());
    }
}
