//! # transfer_classifier
//!
//! Transfer-learning binary image classifier built on Burn.
//!
//! A pretrained ResNet backbone is frozen and a small dense head is trained
//! on top of it from three class-per-folder image trees (train, validation,
//! test). The epoch loop is driven by an explicit list of observers:
//! checkpointing, early stopping, learning-rate plateau decay and metrics
//! logging. The logged metrics can be browsed with the bundled dashboard.
//!
//! ## Modules
//!
//! - [`config`]: typed pipeline configuration (YAML or TOML)
//! - [`dataset`]: class-folder scanning, augmentation, batch generators
//! - [`model`]: ResNet backbone, classification head, weight loading
//! - [`training`]: fit loop, callbacks, checkpoints, metrics log
//! - [`dashboard`]: HTTP server over the metrics log
//! - [`pipeline`]: run mode selection and the training stages
//! - [`utils`]: errors, logging, metrics helpers

pub mod backend;
pub mod config;
pub mod dashboard;
pub mod dataset;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

pub use config::{AugmentationParams, CallbackParams, ImageSize, PipelineConfig};
pub use dataset::{DataSource, DataSplits, DatasetPreparer};
pub use model::{ModelAssembler, ModelSummary, TransferClassifier};
pub use pipeline::{run_training, RunMode, RunOutcome, TrainingReport};
pub use training::{fit, History, Trainer};
pub use utils::error::{Error, Result};

/// Number of output classes handled by the pipeline
pub const NUM_CLASSES: usize = 2;

/// Environment variable selecting between training and dashboard mode
pub const TRAIN_MODE_ENV: &str = "TRAIN_MODEL";

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
