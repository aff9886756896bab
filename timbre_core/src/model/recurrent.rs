use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Lstm, LstmConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

use super::Network;

/// Two stacked LSTMs, a per-step dense tower and a dense head over all steps.
#[derive(Module, Debug)]
pub struct RecurrentNet<B: Backend> {
    lstm1: Lstm<B>,
    lstm2: Lstm<B>,
    dropout: Dropout,
    step1: Linear<B>,
    step2: Linear<B>,
    step3: Linear<B>,
    step4: Linear<B>,
    output: Linear<B>,
}

#[derive(Config, Debug)]
pub struct RecurrentNetConfig {
    pub time_steps: usize,
    pub coefficients: usize,
    pub num_classes: usize,
    #[config(default = "128")]
    pub hidden_size: usize,
    #[config(default = "0.5")]
    pub dropout: f64,
}

impl RecurrentNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> RecurrentNet<B> {
        RecurrentNet {
            lstm1: LstmConfig::new(self.coefficients, self.hidden_size, true).init(device),
            lstm2: LstmConfig::new(self.hidden_size, self.hidden_size, true).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            step1: LinearConfig::new(self.hidden_size, 64).init(device),
            step2: LinearConfig::new(64, 32).init(device),
            step3: LinearConfig::new(32, 16).init(device),
            step4: LinearConfig::new(16, 8).init(device),
            output: LinearConfig::new(8 * self.time_steps, self.num_classes).init(device),
        }
    }
}

impl<B: Backend> Network<B, 3> for RecurrentNet<B> {
    /// `input` is `[batch, steps, coeffs]`; returns logits `[batch, classes]`.
    fn logits(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let (x, _) = self.lstm1.forward(input, None);
        let (x, _) = self.lstm2.forward(x, None);
        let x = self.dropout.forward(x);

        // Linear acts on the last axis, so these apply per time step.
        let x = relu(self.step1.forward(x));
        let x = relu(self.step2.forward(x));
        let x = relu(self.step3.forward(x));
        let x = relu(self.step4.forward(x));

        let x: Tensor<B, 2> = x.flatten(1, 2);
        self.output.forward(x)
    }
}
