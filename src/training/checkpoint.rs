//! Model checkpointing
//!
//! Weights are written as Burn records (`CompactRecorder`, `.mpk`). Every
//! record gets a JSON sidecar with the epoch metrics it was taken at.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::training::callbacks::{CallbackAction, EpochLogs, EpochObserver};
use crate::utils::error::{Error, Result};
use crate::utils::metrics::WeightHistogram;

/// Stem of the best-model checkpoint
pub const BEST_MODEL_NAME: &str = "best_model";

/// File stem of the per-epoch checkpoint (1-based epoch, zero padded)
pub fn epoch_checkpoint_name(epoch: usize) -> String {
    format!("model_epoch_{:02}", epoch)
}

/// Sidecar written next to every checkpoint record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub epoch: usize,
    pub loss: f64,
    pub val_loss: f64,
    pub val_binary_accuracy: f64,
    pub val_auc: f64,
    pub learning_rate: f64,
    pub backbone: String,
    pub trainable_params: usize,
    pub total_params: usize,
    pub timestamp: String,
}

impl CheckpointMetadata {
    pub fn new(logs: &EpochLogs, backbone: impl Into<String>, trainable_params: usize, total_params: usize) -> Self {
        Self {
            epoch: logs.epoch,
            loss: logs.loss,
            val_loss: logs.val_loss,
            val_binary_accuracy: logs.val_binary_accuracy,
            val_auc: logs.val_auc,
            learning_rate: logs.lr,
            backbone: backbone.into(),
            trainable_params,
            total_params,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Sidecar path for a checkpoint stem
    pub fn sidecar_path(checkpoint: &Path) -> PathBuf {
        checkpoint.with_extension("json")
    }

    pub fn save(&self, checkpoint: &Path) -> Result<()> {
        let path = Self::sidecar_path(checkpoint);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize checkpoint metadata: {}", e)))?;
        fs::write(&path, json)?;
        Ok(())
    }

    pub fn load(checkpoint: &Path) -> Result<Self> {
        let json = fs::read_to_string(Self::sidecar_path(checkpoint))?;
        serde_json::from_str(&json)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize checkpoint metadata: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SavePolicy {
    EveryEpoch,
    BestOnly,
}

/// Requests a checkpoint at the end of an epoch
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    dir: PathBuf,
    policy: SavePolicy,
    best: f64,
}

impl ModelCheckpoint {
    /// `{dir}/model_epoch_{NN}` after every epoch
    pub fn every_epoch(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            policy: SavePolicy::EveryEpoch,
            best: f64::INFINITY,
        }
    }

    /// `{dir}/best_model` whenever `val_loss` improves
    pub fn best_only(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            policy: SavePolicy::BestOnly,
            best: f64::INFINITY,
        }
    }
}

impl EpochObserver for ModelCheckpoint {
    fn name(&self) -> &'static str {
        match self.policy {
            SavePolicy::EveryEpoch => "ModelCheckpoint(every_epoch)",
            SavePolicy::BestOnly => "ModelCheckpoint(best_only)",
        }
    }

    fn on_train_begin(&mut self) -> Result<()> {
        self.best = f64::INFINITY;
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, _histograms: &[WeightHistogram]) -> Result<Vec<CallbackAction>> {
        let path = match self.policy {
            SavePolicy::EveryEpoch => self.dir.join(epoch_checkpoint_name(logs.epoch)),
            SavePolicy::BestOnly => {
                // NaN never counts as an improvement
                if !(logs.val_loss < self.best) {
                    return Ok(Vec::new());
                }
                info!(
                    "Epoch {}: val_loss improved from {:.5} to {:.5}, saving model",
                    logs.epoch, self.best, logs.val_loss
                );
                self.best = logs.val_loss;
                self.dir.join(BEST_MODEL_NAME)
            }
        };
        Ok(vec![CallbackAction::SaveCheckpoint { path }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::callbacks::tests::logs;
    use tempfile::TempDir;

    #[test]
    fn test_epoch_names_are_one_based_and_padded() {
        assert_eq!(epoch_checkpoint_name(1), "model_epoch_01");
        assert_eq!(epoch_checkpoint_name(12), "model_epoch_12");
        assert_eq!(epoch_checkpoint_name(100), "model_epoch_100");
    }

    #[test]
    fn test_every_epoch_always_saves() {
        let mut cb = ModelCheckpoint::every_epoch("models");
        let actions = cb.on_epoch_end(&logs(3, 9.0), &[]).unwrap();
        assert_eq!(
            actions,
            vec![CallbackAction::SaveCheckpoint {
                path: PathBuf::from("models/model_epoch_03")
            }]
        );
    }

    #[test]
    fn test_best_only_saves_on_strict_improvement() {
        let mut cb = ModelCheckpoint::best_only("models");
        assert_eq!(cb.on_epoch_end(&logs(1, 0.5), &[]).unwrap().len(), 1);
        assert!(cb.on_epoch_end(&logs(2, 0.5), &[]).unwrap().is_empty());
        assert!(cb.on_epoch_end(&logs(3, 0.7), &[]).unwrap().is_empty());

        let actions = cb.on_epoch_end(&logs(4, 0.4), &[]).unwrap();
        assert_eq!(
            actions,
            vec![CallbackAction::SaveCheckpoint {
                path: PathBuf::from("models/best_model")
            }]
        );
    }

    #[test]
    fn test_best_only_ignores_nan_val_loss() {
        let mut cb = ModelCheckpoint::best_only("models");
        let saved: Vec<usize> = [0.5, f64::NAN, 0.9, 0.95]
            .into_iter()
            .enumerate()
            .map(|(i, loss)| cb.on_epoch_end(&logs(i + 1, loss), &[]).unwrap().len())
            .collect();

        assert_eq!(saved, vec![1, 0, 0, 0]);
        assert_eq!(cb.on_epoch_end(&logs(5, 0.3), &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let dir = TempDir::new().unwrap();
        let stem = dir.path().join("best_model");
        let metadata = CheckpointMetadata::new(&logs(2, 0.25), "resnet50", 10, 100);

        metadata.save(&stem).unwrap();
        assert!(dir.path().join("best_model.json").exists());
        assert_eq!(CheckpointMetadata::load(&stem).unwrap(), metadata);
    }
}
