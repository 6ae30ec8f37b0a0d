//! ResNet feature extractor
//!
//! Convolutional trunk of ResNet-18/34 (basic blocks) and ResNet-50
//! (bottleneck blocks) without the ImageNet classifier. The output is the
//! last feature map `[batch, channels, h/32, w/32]`.

use std::fmt;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

/// Channel expansion of the last convolution in a bottleneck block
pub const BOTTLENECK_EXPANSION: usize = 4;

/// Supported backbone depths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResNetDepth {
    ResNet18,
    ResNet34,
    #[default]
    ResNet50,
}

impl ResNetDepth {
    /// Residual blocks per stage
    pub fn blocks(&self) -> [usize; 4] {
        match self {
            ResNetDepth::ResNet18 => [2, 2, 2, 2],
            ResNetDepth::ResNet34 | ResNetDepth::ResNet50 => [3, 4, 6, 3],
        }
    }

    pub fn uses_bottleneck(&self) -> bool {
        matches!(self, ResNetDepth::ResNet50)
    }

    /// Channels of the final feature map
    pub fn out_channels(&self) -> usize {
        if self.uses_bottleneck() {
            512 * BOTTLENECK_EXPANSION
        } else {
            512
        }
    }
}

impl fmt::Display for ResNetDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResNetDepth::ResNet18 => "resnet18",
            ResNetDepth::ResNet34 => "resnet34",
            ResNetDepth::ResNet50 => "resnet50",
        };
        f.write_str(name)
    }
}

/// Configuration for the ResNet trunk
#[derive(Config, Debug)]
pub struct ResNetConfig {
    pub depth: ResNetDepth,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,
}

impl ResNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        ResNet::new(self, device)
    }
}

fn conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .init(device)
}

fn stem_pool() -> MaxPool2d {
    MaxPool2dConfig::new([3, 3])
        .with_strides([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init()
}

/// 1x1 convolution + batch norm on the shortcut path
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: conv(in_channels, out_channels, 1, stride, 0, device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Two 3x3 convolutions (ResNet-18/34)
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B>,
    pub downsample: Option<Downsample<B>>,
    pub relu: Relu,
}

impl<B: Backend> BasicBlock<B> {
    pub const EXPANSION: usize = 1;

    fn new(in_channels: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != planes)
            .then(|| Downsample::new(in_channels, planes, stride, device));

        Self {
            conv1: conv(in_channels, planes, 3, stride, 1, device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv(planes, planes, 3, 1, 1, device),
            bn2: BatchNormConfig::new(planes).init(device),
            downsample,
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(ds) => ds.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));
        self.relu.forward(out + identity)
    }
}

/// 1x1 → 3x3 → 1x1 convolutions with 4x channel expansion (ResNet-50)
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B>,
    pub conv3: Conv2d<B>,
    pub bn3: BatchNorm<B>,
    pub downsample: Option<Downsample<B>>,
    pub relu: Relu,
}

impl<B: Backend> Bottleneck<B> {
    pub const EXPANSION: usize = BOTTLENECK_EXPANSION;

    fn new(in_channels: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        let out_channels = planes * Self::EXPANSION;
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1: conv(in_channels, planes, 1, 1, 0, device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv(planes, planes, 3, stride, 1, device),
            bn2: BatchNormConfig::new(planes).init(device),
            conv3: conv(planes, out_channels, 1, 1, 0, device),
            bn3: BatchNormConfig::new(out_channels).init(device),
            downsample,
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(ds) => ds.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.relu.forward(self.bn2.forward(self.conv2.forward(out)));
        let out = self.bn3.forward(self.conv3.forward(out));
        self.relu.forward(out + identity)
    }
}

/// One residual block of either kind
#[derive(Module, Debug)]
pub enum ResidualBlock<B: Backend> {
    Basic(BasicBlock<B>),
    Bottleneck(Bottleneck<B>),
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            ResidualBlock::Basic(block) => block.forward(x),
            ResidualBlock::Bottleneck(block) => block.forward(x),
        }
    }
}

/// ResNet trunk: stem + four residual stages
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub relu: Relu,
    pub maxpool: MaxPool2d,
    pub layer1: Vec<ResidualBlock<B>>,
    pub layer2: Vec<ResidualBlock<B>>,
    pub layer3: Vec<ResidualBlock<B>>,
    pub layer4: Vec<ResidualBlock<B>>,
}

impl<B: Backend> ResNet<B> {
    pub fn new(config: &ResNetConfig, device: &B::Device) -> Self {
        let depth = config.depth;
        let blocks = depth.blocks();

        let mut in_channels = 64;
        let mut make_stage = |planes: usize, count: usize, stride: usize| {
            (0..count)
                .map(|i| {
                    let stride = if i == 0 { stride } else { 1 };
                    if depth.uses_bottleneck() {
                        let block = Bottleneck::new(in_channels, planes, stride, device);
                        in_channels = planes * Bottleneck::<B>::EXPANSION;
                        ResidualBlock::Bottleneck(block)
                    } else {
                        let block = BasicBlock::new(in_channels, planes, stride, device);
                        in_channels = planes * BasicBlock::<B>::EXPANSION;
                        ResidualBlock::Basic(block)
                    }
                })
                .collect::<Vec<_>>()
        };

        let layer1 = make_stage(64, blocks[0], 1);
        let layer2 = make_stage(128, blocks[1], 2);
        let layer3 = make_stage(256, blocks[2], 2);
        let layer4 = make_stage(512, blocks[3], 2);

        Self::from_parts(
            conv(config.in_channels, 64, 7, 2, 3, device),
            BatchNormConfig::new(64).init(device),
            [layer1, layer2, layer3, layer4],
        )
    }

    /// Reassemble a trunk from its stem convolution and four stages
    pub fn from_parts(conv1: Conv2d<B>, bn1: BatchNorm<B>, stages: [Vec<ResidualBlock<B>>; 4]) -> Self {
        let [layer1, layer2, layer3, layer4] = stages;
        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            maxpool: stem_pool(),
            layer1,
            layer2,
            layer3,
            layer4,
        }
    }

    pub fn is_bottleneck(&self) -> bool {
        matches!(self.layer1.first(), Some(ResidualBlock::Bottleneck(_)))
    }

    /// `[batch, 3, h, w]` → `[batch, out_channels, h', w']`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let mut x = self.maxpool.forward(x);

        for block in self
            .layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
        {
            x = block.forward(x);
        }
        x
    }

    /// Channels of the final feature map
    pub fn out_channels(&self) -> usize {
        match self.layer4.last() {
            Some(ResidualBlock::Bottleneck(block)) => block.bn3.gamma.dims()[0],
            Some(ResidualBlock::Basic(block)) => block.bn2.gamma.dims()[0],
            None => 64,
        }
    }

    /// Names and output shapes of the stem and each stage for an input of `[h, w]`
    pub fn stage_shapes(&self, height: usize, width: usize) -> Vec<(String, [usize; 3])> {
        // stem: conv stride 2 (pad 3, kernel 7) then maxpool stride 2 (pad 1, kernel 3)
        let down = |n: usize, kernel: usize, stride: usize, pad: usize| (n + 2 * pad - kernel) / stride + 1;
        let (mut h, mut w) = (down(height, 7, 2, 3), down(width, 7, 2, 3));
        let mut shapes = vec![("conv1".to_string(), [64, h, w])];
        h = down(h, 3, 2, 1);
        w = down(w, 3, 2, 1);
        shapes.push(("maxpool".to_string(), [64, h, w]));

        let stages = [&self.layer1, &self.layer2, &self.layer3, &self.layer4];
        for (i, stage) in stages.into_iter().enumerate() {
            if i > 0 {
                h = down(h, 3, 2, 1);
                w = down(w, 3, 2, 1);
            }
            let channels = match stage.last() {
                Some(ResidualBlock::Bottleneck(block)) => block.bn3.gamma.dims()[0],
                Some(ResidualBlock::Basic(block)) => block.bn2.gamma.dims()[0],
                None => 0,
            };
            shapes.push((format!("layer{} ({} blocks)", i + 1, stage.len()), [channels, h, w]));
        }
        shapes
    }
}
