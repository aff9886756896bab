use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

use super::Network;

/// Four same-padded 3x3 convolutions, one 2x2 pool, then a dense head.
#[derive(Module, Debug)]
pub struct ConvNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    pool: MaxPool2d,
    dropout: Dropout,
    fc1: Linear<B>,
    fc2: Linear<B>,
    output: Linear<B>,
}

#[derive(Config, Debug)]
pub struct ConvNetConfig {
    /// Spectral frames per window.
    pub time_steps: usize,
    /// Cepstral coefficients per frame.
    pub coefficients: usize,
    pub num_classes: usize,
    #[config(default = "0.5")]
    pub dropout: f64,
}

impl ConvNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvNet<B> {
        let conv = |channels: [usize; 2]| -> Conv2d<B> {
            Conv2dConfig::new(channels, [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        let pooled = 128 * (self.time_steps / 2) * (self.coefficients / 2);

        ConvNet {
            conv1: conv([1, 16]),
            conv2: conv([16, 32]),
            conv3: conv([32, 64]),
            conv4: conv([64, 128]),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc1: LinearConfig::new(pooled, 128).init(device),
            fc2: LinearConfig::new(128, 64).init(device),
            output: LinearConfig::new(64, self.num_classes).init(device),
        }
    }
}

impl<B: Backend> Network<B, 4> for ConvNet<B> {
    /// `input` is `[batch, steps, coeffs, 1]`; returns logits `[batch, classes]`.
    fn logits(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        // channels last -> channels first
        let x = input.permute([0, 3, 1, 2]);

        let x = relu(self.conv1.forward(x));
        let x = relu(self.conv2.forward(x));
        let x = relu(self.conv3.forward(x));
        let x = relu(self.conv4.forward(x));
        let x = self.pool.forward(x);
        let x = self.dropout.forward(x);

        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = relu(self.fc1.forward(x));
        let x = relu(self.fc2.forward(x));
        self.output.forward(x)
    }
}
