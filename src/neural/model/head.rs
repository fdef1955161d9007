//! Regression head: hidden row → output vector.

use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

#[derive(Module, Debug)]
pub struct RegressionHead<B: Backend> {
    pub(crate) linear: Linear<B>,
}

impl<B: Backend> RegressionHead<B> {
    pub fn new(d_hidden: usize, num_classes: usize, device: &B::Device) -> Self {
        Self {
            linear: LinearConfig::new(d_hidden, num_classes).init(device),
        }
    }

    /// Project a `[1, d_hidden]` row to `[num_classes]`.
    pub fn forward(&self, hidden: Tensor<B, 2>) -> Tensor<B, 1> {
        self.linear.forward(hidden).squeeze_dim::<1>(0)
    }

    pub fn device(&self) -> B::Device {
        self.linear.weight.device()
    }
}
