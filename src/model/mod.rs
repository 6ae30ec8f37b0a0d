//! Model module
//!
//! - [`resnet`]: ResNet-18/34/50 feature extractor
//! - [`head`]: dense classification head with L2-regularised kernels
//! - [`classifier`]: frozen backbone + head
//! - [`pretrained`]: fetching, importing and caching the backbone weights
//! - [`summary`]: layer table and parameter counts

pub mod classifier;
pub mod head;
pub mod pretrained;
pub mod resnet;
pub mod summary;

pub use classifier::TransferClassifier;
pub use head::{ClassificationHead, HeadConfig};
pub use pretrained::{PretrainedWeights, WeightSource};
pub use resnet::{ResNet, ResNetConfig, ResNetDepth};
pub use summary::ModelSummary;

use burn::tensor::backend::Backend;
use tracing::info;

use crate::config::PipelineConfig;
use crate::utils::error::Result;

/// Builds the classifier described by the configuration
pub struct ModelAssembler<'a> {
    config: &'a PipelineConfig,
}

impl<'a> ModelAssembler<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Backbone with pretrained weights, frozen, plus a freshly initialised head
    pub fn build<B: Backend>(&self, device: &B::Device) -> Result<TransferClassifier<B>> {
        let depth = self.config.backbone;
        info!("Building {} backbone", depth);

        let backbone = ResNetConfig::new(depth).init::<B>(device);
        let weights = PretrainedWeights::new(&self.config.pretrained_weights, self.config.weights_url());
        let backbone = weights.load(backbone, device)?;

        let head = HeadConfig::new(backbone.out_channels()).init(device);
        let model = TransferClassifier::new(backbone, head);

        info!(
            "Model ready: {} trainable / {} total parameters",
            model.trainable_params(),
            model.total_params()
        );
        Ok(model)
    }

    pub fn summary<B: Backend>(&self, model: &TransferClassifier<B>) -> ModelSummary {
        ModelSummary::new(model, self.config.backbone.to_string(), self.config.img_size)
    }
}
