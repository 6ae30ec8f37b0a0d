//! Training module
//!
//! This module provides:
//! - The epoch loop ([`fit`]) driven by an ordered list of observers
//! - The Burn-backed training session ([`Trainer`])
//! - Checkpointing, early stopping, plateau LR decay and a metrics log
//!
//! ## Observer order
//!
//! [`default_callbacks`] wires the observers in the order their actions are
//! applied after each epoch:
//! 1. per-epoch checkpoint
//! 2. best-model checkpoint
//! 3. early stopping
//! 4. learning-rate decay
//! 5. metrics logger

pub mod callbacks;
pub mod checkpoint;
pub mod early_stopping;
pub mod fit;
pub mod metrics_logger;
pub mod scheduler;
pub mod trainer;

use std::path::PathBuf;

pub use callbacks::{CallbackAction, CallbackList, EpochLogs, EpochObserver};
pub use checkpoint::{epoch_checkpoint_name, CheckpointMetadata, ModelCheckpoint, BEST_MODEL_NAME};
pub use early_stopping::EarlyStopping;
pub use fit::{fit, History, TrainingSession};
pub use metrics_logger::{EventRecord, EventWriter, MetricsLogger};
pub use scheduler::ReduceLrOnPlateau;
pub use trainer::{evaluate_model, Trainer};

use crate::config::PipelineConfig;

/// Observer list used by the pipeline, plus the metrics run directory
pub fn default_callbacks(config: &PipelineConfig) -> (CallbackList, PathBuf) {
    let logger = MetricsLogger::new(&config.log_dir);
    let run_dir = logger.run_dir().to_path_buf();

    let callbacks = CallbackList::new()
        .with(ModelCheckpoint::every_epoch(&config.model_save_path))
        .with(ModelCheckpoint::best_only(&config.model_save_path))
        .with(EarlyStopping::new(config.callbacks.early_stopping_patience))
        .with(ReduceLrOnPlateau::from_params(&config.callbacks))
        .with(logger);

    (callbacks, run_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::test_config;
    use tempfile::TempDir;

    #[test]
    fn test_default_callbacks_order() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let (callbacks, run_dir) = default_callbacks(&config);

        assert_eq!(
            callbacks.names(),
            vec![
                "ModelCheckpoint(every_epoch)",
                "ModelCheckpoint(best_only)",
                "EarlyStopping",
                "ReduceLrOnPlateau",
                "MetricsLogger",
            ]
        );
        assert!(callbacks.wants_histograms());
        assert!(run_dir.starts_with(&config.log_dir));
    }
}
