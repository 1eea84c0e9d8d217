//! CNN Model Architectures
//!
//! The two networks selectable through the `net` option. Both map a
//! `[batch, 3, size, size]` tensor to `[batch, num_classes]` logits; the
//! rest of the crate only ever sees those logits.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Configuration shared by both classifier networks
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    /// Number of output classes
    #[config(default = "128")]
    pub num_classes: usize,

    /// Input image size (assumes square images)
    #[config(default = "299")]
    pub input_size: usize,

    /// Dropout rate used during training; inactive at inference
    #[config(default = "0.3")]
    pub dropout_rate: f64,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Base number of convolutional filters
    #[config(default = "32")]
    pub base_filters: usize,
}

/// A CNN block with Conv2d, BatchNorm, ReLU, and optional MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    /// Create a new convolutional block
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        with_pool: bool,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let bn = BatchNormConfig::new(out_channels).init(device);

        let pool = if with_pool {
            Some(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init())
        } else {
            None
        };

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    /// Forward pass through the block
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Standard classifier (`cnn`)
///
/// Architecture:
/// - 4 convolutional blocks with doubling filter counts, each pooled
/// - Global Average Pooling
/// - Fully connected head with dropout
#[derive(Module, Debug)]
pub struct CnnClassifier<B: Backend> {
    pub conv1: ConvBlock<B>,
    pub conv2: ConvBlock<B>,
    pub conv3: ConvBlock<B>,
    pub conv4: ConvBlock<B>,

    pub global_pool: AdaptiveAvgPool2d,

    pub fc1: Linear<B>,
    pub dropout: Dropout,
    pub fc2: Linear<B>,

    num_classes: usize,
}

impl<B: Backend> CnnClassifier<B> {
    pub fn new(config: &ClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        let conv1 = ConvBlock::new(config.in_channels, base, 3, true, device);
        let conv2 = ConvBlock::new(base, base * 2, 3, true, device);
        let conv3 = ConvBlock::new(base * 2, base * 4, 3, true, device);
        let conv4 = ConvBlock::new(base * 4, base * 8, 3, true, device);

        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();

        let fc1 = LinearConfig::new(base * 8, 256).init(device);
        let dropout = DropoutConfig::new(config.dropout_rate).init();
        let fc2 = LinearConfig::new(256, config.num_classes).init(device);

        Self {
            conv1,
            conv2,
            conv3,
            conv4,
            global_pool,
            fc1,
            dropout,
            fc2,
            num_classes: config.num_classes,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        let x = self.conv4.forward(x);

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.fc1.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// A smaller, faster classifier (`cnn_lite`)
#[derive(Module, Debug)]
pub struct CnnLiteClassifier<B: Backend> {
    block1: ConvBlock<B>,
    block2: ConvBlock<B>,
    block3: ConvBlock<B>,

    global_pool: AdaptiveAvgPool2d,

    fc: Linear<B>,
    dropout: Dropout,
    classifier: Linear<B>,

    num_classes: usize,
}

impl<B: Backend> CnnLiteClassifier<B> {
    pub fn new(config: &ClassifierConfig, device: &B::Device) -> Self {
        let base = (config.base_filters / 2).max(1);

        Self {
            block1: ConvBlock::new(config.in_channels, base, 3, true, device),
            block2: ConvBlock::new(base, base * 2, 3, true, device),
            block3: ConvBlock::new(base * 2, base * 4, 3, false, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(base * 4, 128).init(device),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            classifier: LinearConfig::new(128, config.num_classes).init(device),
            num_classes: config.num_classes,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.block1.forward(x);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.fc.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout.forward(x);
        self.classifier.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// One of the selectable networks, ready to score
#[derive(Debug)]
pub enum Network<B: Backend> {
    Cnn(CnnClassifier<B>),
    CnnLite(CnnLiteClassifier<B>),
}

impl<B: Backend> Network<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Network::Cnn(model) => model.forward(x),
            Network::CnnLite(model) => model.forward(x),
        }
    }

    pub fn num_classes(&self) -> usize {
        match self {
            Network::Cnn(model) => model.num_classes(),
            Network::CnnLite(model) => model.num_classes(),
        }
    }
}
