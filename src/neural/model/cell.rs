//! Recurrent cells: RNN, LSTM and GRU behind one step contract.
//!
//! All cells map `(input [1, d_in], state) -> state`, where the state is a
//! hidden row `[1, d_hidden]` plus, for LSTM, a cell row of the same width.
//! Gate layout follows the usual convention: LSTM `(i, f, g, o)`, GRU
//! `(r, z, n)`.

use std::fmt;
use std::str::FromStr;

use burn::config::Config;
use burn::module::{Ignored, Module, Param};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{sigmoid, tanh};
use burn::tensor::Distribution;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

// ─── Cell kind ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CellKind {
    Rnn,
    Lstm,
    Gru,
}

impl CellKind {
    /// Gate blocks stacked in the input/recurrent projections.
    fn gates(self) -> usize {
        match self {
            Self::Rnn => 1,
            Self::Lstm => 4,
            Self::Gru => 3,
        }
    }

    pub fn has_cell_state(self) -> bool {
        matches!(self, Self::Lstm)
    }
}

impl FromStr for CellKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rnn" => Ok(Self::Rnn),
            "lstm" => Ok(Self::Lstm),
            "gru" => Ok(Self::Gru),
            _ => Err(ModelError::UnknownCellType(s.to_string())),
        }
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rnn => write!(f, "rnn"),
            Self::Lstm => write!(f, "lstm"),
            Self::Gru => write!(f, "gru"),
        }
    }
}

impl TryFrom<String> for CellKind {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CellKind> for String {
    fn from(value: CellKind) -> Self {
        value.to_string()
    }
}

// ─── State ────────────────────────────────────────────────────────

/// Recurrent state for a batch of one: hidden row plus optional LSTM cell row.
#[derive(Debug, Clone)]
pub struct CellState<B: Backend> {
    pub hidden: Tensor<B, 2>,
    pub cell: Option<Tensor<B, 2>>,
}

impl<B: Backend> CellState<B> {
    pub fn zeros(kind: CellKind, d_hidden: usize, device: &B::Device) -> Self {
        let hidden = Tensor::zeros([1, d_hidden], device);
        let cell = kind.has_cell_state().then(|| hidden.zeros_like());
        Self { hidden, cell }
    }

    /// Elementwise maximum, applied to each component independently.
    pub fn max(self, other: Self) -> Self {
        Self {
            hidden: self.hidden.max_pair(other.hidden),
            cell: zip_components(self.cell, other.cell, |a, b| a.max_pair(b)),
        }
    }

    /// Elementwise sum, applied to each component independently.
    pub fn add(self, other: Self) -> Self {
        Self {
            hidden: self.hidden + other.hidden,
            cell: zip_components(self.cell, other.cell, |a, b| a + b),
        }
    }
}

fn zip_components<B: Backend>(
    a: Option<Tensor<B, 2>>,
    b: Option<Tensor<B, 2>>,
    f: impl FnOnce(Tensor<B, 2>, Tensor<B, 2>) -> Tensor<B, 2>,
) -> Option<Tensor<B, 2>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, b) => a.or(b),
    }
}

// ─── Configuration ────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct RecurrentCellConfig {
    /// Input row width.
    pub d_input: usize,
    /// Hidden (and cell) row width.
    pub d_hidden: usize,
    #[config(default = "CellKind::Lstm")]
    pub kind: CellKind,
}

impl RecurrentCellConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> RecurrentCell<B> {
        let width = self.kind.gates() * self.d_hidden;
        RecurrentCell {
            input: LinearConfig::new(self.d_input, width).init(device),
            recurrent: LinearConfig::new(self.d_hidden, width).init(device),
            kind: Ignored(self.kind),
            d_hidden: self.d_hidden,
        }
    }
}

// ─── Cell ─────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct RecurrentCell<B: Backend> {
    /// Input projection: d_input → gates·d_hidden
    pub(crate) input: Linear<B>,
    /// Recurrent projection: d_hidden → gates·d_hidden
    pub(crate) recurrent: Linear<B>,
    kind: Ignored<CellKind>,
    d_hidden: usize,
}

impl<B: Backend> RecurrentCell<B> {
    pub fn kind(&self) -> CellKind {
        self.kind.0
    }

    pub fn d_hidden(&self) -> usize {
        self.d_hidden
    }

    pub fn zero_state(&self, device: &B::Device) -> CellState<B> {
        CellState::zeros(self.kind(), self.d_hidden, device)
    }

    /// One recurrent step.
    pub fn step(&self, input: Tensor<B, 2>, state: CellState<B>) -> CellState<B> {
        let gi = self.input.forward(input);
        let gh = self.recurrent.forward(state.hidden.clone());
        let h = self.d_hidden;

        match self.kind() {
            CellKind::Rnn => CellState {
                hidden: tanh(gi + gh),
                cell: None,
            },
            CellKind::Lstm => {
                let [i, f, g, o] = split_gates(gi + gh, h);
                let c_prev = state.cell.unwrap_or_else(|| state.hidden.zeros_like());
                let c = sigmoid(f) * c_prev + sigmoid(i) * tanh(g);
                let hidden = sigmoid(o) * tanh(c.clone());
                CellState {
                    hidden,
                    cell: Some(c),
                }
            }
            CellKind::Gru => {
                let [ir, iz, in_] = split_gates(gi, h);
                let [hr, hz, hn] = split_gates(gh, h);
                let r = sigmoid(ir + hr);
                let z = sigmoid(iz + hz);
                let n = tanh(in_ + r * hn);
                let keep = z.clone().neg().add_scalar(1.0);
                CellState {
                    hidden: keep * n + z * state.hidden,
                    cell: None,
                }
            }
        }
    }

    /// Run a sequence of input rows from `init`.
    ///
    /// Returns the hidden output after every step and the final state.
    pub fn run(
        &self,
        inputs: Vec<Tensor<B, 2>>,
        init: CellState<B>,
    ) -> (Vec<Tensor<B, 2>>, CellState<B>) {
        let mut outputs = Vec::with_capacity(inputs.len());
        let mut state = init;
        for x in inputs {
            state = self.step(x, state);
            outputs.push(state.hidden.clone());
        }
        (outputs, state)
    }
}

fn split_gates<B: Backend, const N: usize>(gates: Tensor<B, 2>, width: usize) -> [Tensor<B, 2>; N] {
    std::array::from_fn(|k| gates.clone().narrow(1, k * width, width))
}

/// Split a `[n, d]` matrix into `n` rows of shape `[1, d]`.
pub fn rows<B: Backend>(matrix: Tensor<B, 2>) -> Vec<Tensor<B, 2>> {
    let n = matrix.dims()[0];
    (0..n).map(|i| matrix.clone().narrow(0, i, 1)).collect()
}

// ─── Learned initial state ────────────────────────────────────────

/// Trainable initial state, drawn uniformly in ±1/sqrt(d_hidden).
#[derive(Module, Debug)]
pub struct LearnedState<B: Backend> {
    pub(crate) hidden: Param<Tensor<B, 2>>,
    pub(crate) cell: Option<Param<Tensor<B, 2>>>,
}

impl<B: Backend> LearnedState<B> {
    pub fn new(kind: CellKind, d_hidden: usize, device: &B::Device) -> Self {
        let bound = 1.0 / (d_hidden as f64).sqrt();
        let draw = || {
            Param::from_tensor(Tensor::random(
                [1, d_hidden],
                Distribution::Uniform(-bound, bound),
                device,
            ))
        };
        Self {
            hidden: draw(),
            cell: kind.has_cell_state().then(draw),
        }
    }

    pub fn state(&self) -> CellState<B> {
        CellState {
            hidden: self.hidden.val(),
            cell: self.cell.as_ref().map(|c| c.val()),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
