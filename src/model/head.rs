//! Classification head
//!
//! Global average pooling followed by three dense blocks
//! (dense + ReLU → batch norm → dropout) and a single-logit output layer.
//! The hidden dense kernels carry an L2 penalty.

use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::utils::metrics::WeightHistogram;

/// Units of the hidden dense layers
pub const HIDDEN_UNITS: [usize; 3] = [1024, 512, 256];

/// Configuration for the classification head
#[derive(Config, Debug)]
pub struct HeadConfig {
    /// Channels of the backbone feature map
    pub in_features: usize,

    #[config(default = "0.5")]
    pub dropout: f64,

    /// L2 factor applied to the hidden dense kernels
    #[config(default = "0.001")]
    pub l2: f64,

    /// Weight of the current batch in the running statistics
    /// (Keras momentum 0.99)
    #[config(default = "0.01")]
    pub bn_momentum: f64,

    #[config(default = "1e-3")]
    pub bn_epsilon: f64,
}

impl HeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassificationHead<B> {
        let mut in_features = self.in_features;
        let blocks = HIDDEN_UNITS
            .iter()
            .map(|&units| {
                let block = DenseBlock {
                    linear: LinearConfig::new(in_features, units).init(device),
                    relu: Relu::new(),
                    bn: BatchNormConfig::new(units)
                        .with_momentum(self.bn_momentum)
                        .with_epsilon(self.bn_epsilon)
                        .init(device),
                    dropout: DropoutConfig::new(self.dropout).init(),
                };
                in_features = units;
                block
            })
            .collect();

        ClassificationHead {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            blocks,
            output: LinearConfig::new(in_features, 1).init(device),
            l2: self.l2,
        }
    }
}

/// Dense → ReLU → BatchNorm → Dropout
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    pub linear: Linear<B>,
    pub relu: Relu,
    pub bn: BatchNorm<B>,
    pub dropout: Dropout,
}

impl<B: Backend> DenseBlock<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.linear.forward(x));

        // batch norm expects [batch, channels, ...]
        let [batch, units] = x.dims();
        let x = self.bn.forward(x.reshape([batch, units, 1])).reshape([batch, units]);

        self.dropout.forward(x)
    }
}

/// Trainable head on top of the frozen backbone
#[derive(Module, Debug)]
pub struct ClassificationHead<B: Backend> {
    pub pool: AdaptiveAvgPool2d,
    pub blocks: Vec<DenseBlock<B>>,
    pub output: Linear<B>,
    l2: f64,
}

impl<B: Backend> ClassificationHead<B> {
    /// Feature map `[batch, channels, h, w]` → logits `[batch, 1]`
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(features);
        let [batch, channels, _, _] = x.dims();
        let mut x = x.reshape([batch, channels]);

        for block in &self.blocks {
            x = block.forward(x);
        }
        self.output.forward(x)
    }

    /// `l2 * Σ w²` over the hidden dense kernels
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let device = self.output.weight.device();
        self.blocks
            .iter()
            .map(|block| block.linear.weight.val().powf_scalar(2.0).sum())
            .fold(Tensor::zeros([1], &device), |acc, sq| acc + sq)
            .mul_scalar(self.l2)
    }

    /// Parameters updated by the optimizer: dense kernels and biases plus
    /// batch-norm scale and shift (running statistics excluded)
    pub fn trainable_params(&self) -> usize {
        let linear = |l: &Linear<B>| {
            l.weight.shape().num_elements() + l.bias.as_ref().map_or(0, |b| b.shape().num_elements())
        };
        let blocks: usize = self
            .blocks
            .iter()
            .map(|block| {
                linear(&block.linear)
                    + block.bn.gamma.shape().num_elements()
                    + block.bn.beta.shape().num_elements()
            })
            .sum();
        blocks + linear(&self.output)
    }

    /// Histograms of every dense kernel and bias
    pub fn weight_histograms(&self) -> Vec<WeightHistogram> {
        let mut layers: Vec<(String, &Linear<B>)> = self
            .blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (format!("dense_{}", i + 1), &block.linear))
            .collect();
        layers.push(("output".to_string(), &self.output));

        let mut histograms = Vec::new();
        for (name, linear) in layers {
            let weights: Vec<f32> = linear.weight.val().into_data().iter::<f32>().collect();
            histograms.push(WeightHistogram::from_values(
                format!("{name}/kernel"),
                &weights,
                WeightHistogram::DEFAULT_BUCKETS,
            ));

            if let Some(bias) = &linear.bias {
                let values: Vec<f32> = bias.val().into_data().iter::<f32>().collect();
                histograms.push(WeightHistogram::from_values(
                    format!("{name}/bias"),
                    &values,
                    WeightHistogram::DEFAULT_BUCKETS,
                ));
            }
        }
        histograms
    }

    /// Layer names and output widths for the model summary
    pub fn layer_shapes(&self) -> Vec<(String, usize)> {
        let mut shapes = Vec::new();
        for (i, block) in self.blocks.iter().enumerate() {
            let units = block.linear.weight.dims()[1];
            shapes.push((format!("dense_{} + relu", i + 1), units));
            shapes.push((format!("batch_norm_{}", i + 1), units));
            shapes.push((format!("dropout_{}", i + 1), units));
        }
        shapes.push(("output (sigmoid)".to_string(), self.output.weight.dims()[1]));
        shapes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_head_output_shape() {
        let device = Default::default();
        let head: ClassificationHead<TestBackend> = HeadConfig::new(64).init(&device);

        let features = Tensor::<TestBackend, 4>::ones([3, 64, 2, 2], &device);
        assert_eq!(head.forward(features).dims(), [3, 1]);
    }

    #[test]
    fn test_batch_norm_uses_keras_statistics() {
        let device = Default::default();
        let head: ClassificationHead<TestBackend> = HeadConfig::new(16).init(&device);

        for block in &head.blocks {
            assert_eq!(block.bn.momentum, 0.01);
            assert_eq!(block.bn.epsilon, 1e-3);
        }
    }

    #[test]
    fn test_head_param_count() {
        let device = Default::default();
        let head: ClassificationHead<TestBackend> = HeadConfig::new(64).init(&device);

        // dense (w + b) + batch norm (gamma + beta)
        let expected = (64 * 1024 + 1024 + 2 * 1024)
            + (1024 * 512 + 512 + 2 * 512)
            + (512 * 256 + 256 + 2 * 256)
            + (256 + 1);
        assert_eq!(head.trainable_params(), expected);
        assert!(head.num_params() >= expected);
    }

    #[test]
    fn test_l2_penalty_matches_manual_sum() {
        let device = Default::default();
        let head: ClassificationHead<TestBackend> = HeadConfig::new(8).init(&device);

        let manual: f64 = head
            .blocks
            .iter()
            .flat_map(|b| b.linear.weight.val().into_data().iter::<f32>().collect::<Vec<_>>())
            .map(|w| (w as f64) * (w as f64))
            .sum::<f64>()
            * 0.001;
        let penalty = head.l2_penalty().into_scalar() as f64;

        assert!((penalty - manual).abs() < 1e-4 * manual.max(1.0));
    }

    #[test]
    fn test_weight_histograms_cover_all_layers() {
        let device = Default::default();
        let head: ClassificationHead<TestBackend> = HeadConfig::new(8).init(&device);

        let histograms = head.weight_histograms();
        assert_eq!(histograms.len(), 8);
        assert_eq!(histograms[0].tag, "dense_1/kernel");
        assert_eq!(histograms[0].count, 8 * 1024);
    }
}
