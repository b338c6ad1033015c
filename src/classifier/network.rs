//! Convolutional network
//!
//! A stack of `[Conv 3x3 + ReLU + MaxPool 2x2]` blocks followed by
//! `Flatten -> Dense(hidden) + ReLU -> Dropout -> Dense(outputs)`.
//! The forward pass returns raw logits; sigmoid / softmax are applied by
//! the loss and by inference.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation, backend::Backend, Tensor},
};

use super::CHANNELS;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Input size {size}x{size} is too small for {blocks} convolution blocks")]
    InputTooSmall { size: usize, blocks: usize },

    #[error("At least one convolution block is required")]
    NoBlocks,
}

#[derive(Config, Debug)]
pub struct TumorNetConfig {
    /// Width of the output layer (1 for binary)
    pub num_outputs: usize,
    /// Output channels of each convolution block
    pub conv_channels: Vec<usize>,
    #[config(default = 150)]
    pub image_size: usize,
    #[config(default = 128)]
    pub hidden_size: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
}

impl TumorNetConfig {
    /// Spatial side length after all convolution blocks.
    ///
    /// Each block is a valid 3x3 convolution (`s - 2`) followed by a 2x2
    /// pool with stride 2 (floor division).
    pub fn feature_map_size(&self) -> Result<usize, NetworkError> {
        if self.conv_channels.is_empty() {
            return Err(NetworkError::NoBlocks);
        }

        let mut size = self.image_size;
        for _ in &self.conv_channels {
            if size < 4 {
                return Err(NetworkError::InputTooSmall {
                    size: self.image_size,
                    blocks: self.conv_channels.len(),
                });
            }
            size = (size - 2) / 2;
        }
        Ok(size)
    }

    /// Length of the flattened feature vector fed to the dense layers
    pub fn flattened_size(&self) -> Result<usize, NetworkError> {
        let side = self.feature_map_size()?;
        let channels = self.conv_channels.last().copied().unwrap_or_default();
        Ok(channels * side * side)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<TumorNet<B>, NetworkError> {
        let flattened = self.flattened_size()?;

        let mut blocks = Vec::with_capacity(self.conv_channels.len());
        let mut in_channels = CHANNELS;
        for &out_channels in &self.conv_channels {
            blocks.push(ConvBlock {
                conv: Conv2dConfig::new([in_channels, out_channels], [3, 3]).init(device),
                pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            });
            in_channels = out_channels;
        }

        tracing::debug!(
            "Network: {} blocks {:?}, flattened {} -> {} -> {}",
            blocks.len(),
            self.conv_channels,
            flattened,
            self.hidden_size,
            self.num_outputs
        );

        Ok(TumorNet {
            blocks,
            fc: LinearConfig::new(flattened, self.hidden_size).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            head: LinearConfig::new(self.hidden_size, self.num_outputs).init(device),
            activation: Relu::new(),
        })
    }
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: MaxPool2d,
}

#[derive(Module, Debug)]
pub struct TumorNet<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    fc: Linear<B>,
    dropout: Dropout,
    head: Linear<B>,
    activation: Relu,
}

impl<B: Backend> TumorNet<B> {
    /// `images`: `[batch, 3, size, size]` -> logits `[batch, outputs]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let mut x = images;
        for block in &self.blocks {
            x = block.conv.forward(x);
            x = self.activation.forward(x);
            x = block.pool.forward(x);
        }

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.head.forward(x)
    }

    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        to_probabilities(self.forward(images))
    }
}

/// Sigmoid of a single output, softmax over several
pub fn to_probabilities<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 2> {
    let [_, outputs] = logits.dims();
    if outputs == 1 {
        activation::sigmoid(logits)
    } else {
        activation::softmax(logits, 1)
    }
}
