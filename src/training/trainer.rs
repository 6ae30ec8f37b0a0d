//! Burn training session
//!
//! Binary cross-entropy on logits plus the head's L2 penalty, minimised with
//! Adam. Only the head receives gradients.

use std::path::Path;

use burn::{
    data::dataloader::batcher::Batcher,
    module::{AutodiffModule, Module},
    nn::loss::BinaryCrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::CompactRecorder,
    tensor::{
        activation::sigmoid,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::dataset::{DataSource, ImageBatch, ImageBatcher};
use crate::model::TransferClassifier;
use crate::training::callbacks::EpochLogs;
use crate::training::checkpoint::CheckpointMetadata;
use crate::training::fit::TrainingSession;
use crate::utils::error::{Error, Result};
use crate::utils::metrics::{BinaryMetrics, MetricSummary, WeightHistogram};

fn progress_bar(len: usize, show: bool, prefix: &str) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "  {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb
}

fn batch_labels<B: Backend>(targets: Tensor<B, 2, Int>) -> Vec<f32> {
    targets
        .into_data()
        .iter::<i64>()
        .map(|v| v as f32)
        .collect()
}

/// Binary cross-entropy on logits plus the L2 penalty of the head
fn regularised_loss<B: Backend>(
    model: &TransferClassifier<B>,
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2, Int>,
) -> Tensor<B, 1> {
    let bce = BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(&logits.device())
        .forward(logits, targets);
    bce + model.head.l2_penalty()
}

/// One pass over `source` in inference mode
pub fn evaluate_model<B: Backend>(
    model: &TransferClassifier<B>,
    source: &mut DataSource,
    device: &B::Device,
    show_progress: bool,
) -> Result<MetricSummary> {
    let batcher = ImageBatcher::new(source.image_size());
    let pb = progress_bar(source.batches_per_epoch(), show_progress, source.name());
    let name = source.name().to_string();
    let mut metrics = BinaryMetrics::new();

    for items in source.epoch() {
        let batch: ImageBatch<B> = batcher.batch(items?, device);
        let logits = model.forward(batch.images);
        let loss = regularised_loss(model, logits.clone(), batch.targets.clone());
        let loss_value: f64 = loss.into_scalar().elem();

        let probabilities: Vec<f32> = sigmoid(logits).into_data().iter::<f32>().collect();
        metrics.update(loss_value, &probabilities, &batch_labels(batch.targets));
        pb.inc(1);
    }

    pb.finish_and_clear();
    let summary = metrics.summary();
    debug!(
        "{}: loss {:.4}, binary_accuracy {:.4}, auc {:.4}",
        name, summary.loss, summary.binary_accuracy, summary.auc
    );
    Ok(summary)
}

/// Trains a [`TransferClassifier`] on the training source
pub struct Trainer<B: AutodiffBackend, O> {
    model: TransferClassifier<B>,
    optimizer: O,
    train: DataSource,
    validation: DataSource,
    batcher: ImageBatcher,
    device: B::Device,
    backbone_name: String,
    snapshot: Option<TransferClassifier<B>>,
    show_progress: bool,
}

/// Adam epsilon, matching Keras
pub const ADAM_EPSILON: f32 = 1e-7;

/// Adam with default moments and the Keras epsilon
pub fn adam_config() -> AdamConfig {
    AdamConfig::new().with_epsilon(ADAM_EPSILON)
}

impl<B: AutodiffBackend> Trainer<B, ()> {
    /// Trainer using [`adam_config`]
    pub fn with_adam(
        model: TransferClassifier<B>,
        train: DataSource,
        validation: DataSource,
        device: B::Device,
    ) -> Trainer<B, impl Optimizer<TransferClassifier<B>, B>> {
        let optimizer = adam_config().init::<B, TransferClassifier<B>>();
        Trainer::new(model, optimizer, train, validation, device)
    }
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<TransferClassifier<B>, B>,
{
    pub fn new(
        model: TransferClassifier<B>,
        optimizer: O,
        train: DataSource,
        validation: DataSource,
        device: B::Device,
    ) -> Self {
        let batcher = ImageBatcher::new(train.image_size());
        Self {
            model,
            optimizer,
            train,
            validation,
            batcher,
            device,
            backbone_name: String::from("resnet"),
            snapshot: None,
            show_progress: true,
        }
    }

    /// Backbone name recorded in checkpoint metadata
    pub fn with_backbone_name(mut self, name: impl Into<String>) -> Self {
        self.backbone_name = name.into();
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn model(&self) -> &TransferClassifier<B> {
        &self.model
    }

    /// Evaluate the current weights on any data source
    pub fn evaluate(&self, source: &mut DataSource) -> Result<MetricSummary> {
        evaluate_model(&self.model.valid(), source, &self.device, self.show_progress)
    }
}

impl<B, O> TrainingSession for Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<TransferClassifier<B>, B>,
{
    fn train_epoch(&mut self, epoch: usize, lr: f64) -> Result<MetricSummary> {
        let pb = progress_bar(
            self.train.batches_per_epoch(),
            self.show_progress,
            &format!("epoch {epoch}"),
        );
        let mut metrics = BinaryMetrics::new();

        for items in self.train.epoch() {
            let batch: ImageBatch<B> = self.batcher.batch(items?, &self.device);

            let logits = self.model.forward_train(batch.images);
            let loss = regularised_loss(&self.model, logits.clone(), batch.targets.clone());
            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                pb.abandon();
                return Err(Error::Training(format!(
                    "loss became {loss_value} in epoch {epoch}"
                )));
            }

            let probabilities: Vec<f32> = sigmoid(logits.detach())
                .into_data()
                .iter::<f32>()
                .collect();
            metrics.update(loss_value, &probabilities, &batch_labels(batch.targets));

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self.optimizer.step(lr, self.model.clone(), grads);

            pb.set_message(format!("loss {:.4}", metrics.loss()));
            pb.inc(1);
        }

        pb.finish_and_clear();
        Ok(metrics.summary())
    }

    fn validate(&mut self, _epoch: usize) -> Result<MetricSummary> {
        evaluate_model(
            &self.model.valid(),
            &mut self.validation,
            &self.device,
            self.show_progress,
        )
    }

    fn snapshot(&mut self) {
        self.snapshot = Some(self.model.clone());
    }

    fn restore_snapshot(&mut self) -> bool {
        match &self.snapshot {
            Some(model) => {
                self.model = model.clone();
                true
            }
            None => false,
        }
    }

    fn save_checkpoint(&self, path: &Path, logs: &EpochLogs) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.model
            .clone()
            .save_file(path, &CompactRecorder::new())
            .map_err(|e| Error::Training(format!("Failed to save checkpoint {}: {e}", path.display())))?;

        CheckpointMetadata::new(
            logs,
            self.backbone_name.clone(),
            self.model.trainable_params(),
            self.model.total_params(),
        )
        .save(path)?;

        debug!("Checkpoint saved to {}", path.display());
        Ok(())
    }

    fn weight_histograms(&self) -> Vec<WeightHistogram> {
        self.model.head.weight_histograms()
    }
}
