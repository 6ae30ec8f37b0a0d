//! Early stopping on `val_loss`

use tracing::info;

use crate::training::callbacks::{CallbackAction, EpochLogs, EpochObserver};
use crate::utils::error::Result;
use crate::utils::metrics::WeightHistogram;

/// Stops training once `val_loss` has not improved for `patience` epochs
///
/// The weights of the best epoch are snapshotted on every improvement and
/// restored when training is stopped.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    restore_best_weights: bool,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            restore_best_weights: true,
            best: f64::INFINITY,
            best_epoch: None,
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn with_restore_best_weights(mut self, restore: bool) -> Self {
        self.restore_best_weights = restore;
        self
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

impl EpochObserver for EarlyStopping {
    fn name(&self) -> &'static str {
        "EarlyStopping"
    }

    fn on_train_begin(&mut self) -> Result<()> {
        self.best = f64::INFINITY;
        self.best_epoch = None;
        self.wait = 0;
        self.stopped_epoch = None;
        Ok(())
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, _histograms: &[WeightHistogram]) -> Result<Vec<CallbackAction>> {
        let current = logs.val_loss;
        self.wait += 1;

        if current < self.best {
            self.best = current;
            self.best_epoch = Some(logs.epoch);
            self.wait = 0;
            return Ok(if self.restore_best_weights {
                vec![CallbackAction::SnapshotWeights]
            } else {
                Vec::new()
            });
        }

        if self.wait >= self.patience {
            self.stopped_epoch = Some(logs.epoch);
            info!(
                "Epoch {}: early stopping (no val_loss improvement for {} epochs)",
                logs.epoch, self.wait
            );
            if self.restore_best_weights {
                if let Some(best_epoch) = self.best_epoch {
                    info!("Restoring model weights from the end of the best epoch: {}", best_epoch);
                }
            }
            return Ok(vec![CallbackAction::StopTraining {
                restore_snapshot: self.restore_best_weights && self.best_epoch.is_some(),
            }]);
        }

        Ok(Vec::new())
    }
}
