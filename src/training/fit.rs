//! Epoch loop
//!
//! [`fit`] runs training epochs against any [`TrainingSession`] and applies
//! the actions returned by the callback list after every epoch.

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::training::callbacks::{CallbackAction, CallbackList, EpochLogs};
use crate::utils::error::{Error, Result};
use crate::utils::format_duration;
use crate::utils::metrics::{MetricSummary, WeightHistogram};

/// Everything the epoch loop needs from a model under training
pub trait TrainingSession {
    /// One pass over the training data at learning rate `lr`
    fn train_epoch(&mut self, epoch: usize, lr: f64) -> Result<MetricSummary>;

    /// One pass over the validation data
    fn validate(&mut self, epoch: usize) -> Result<MetricSummary>;

    /// Remember the current weights
    fn snapshot(&mut self);

    /// Go back to the last snapshot; false when there is none
    fn restore_snapshot(&mut self) -> bool;

    fn save_checkpoint(&self, path: &Path, logs: &EpochLogs) -> Result<()>;

    fn weight_histograms(&self) -> Vec<WeightHistogram>;
}

/// Per-epoch logs of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochLogs>,
    /// Epoch at which early stopping ended the run
    pub stopped_epoch: Option<usize>,
}

impl History {
    pub fn from_epochs(epochs: Vec<EpochLogs>) -> Self {
        Self {
            epochs,
            stopped_epoch: None,
        }
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochLogs> {
        self.epochs.last()
    }

    /// Epoch with the lowest validation loss
    pub fn best(&self) -> Option<&EpochLogs> {
        self.epochs
            .iter()
            .min_by(|a, b| a.val_loss.total_cmp(&b.val_loss))
    }

    /// Values of one metric across epochs
    pub fn metric(&self, name: &str) -> Vec<f64> {
        self.epochs
            .iter()
            .filter_map(|logs| {
                logs.scalars()
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, v)| *v)
            })
            .collect()
    }
}

/// Train for up to `epochs` epochs starting at `learning_rate`
pub fn fit<S: TrainingSession>(
    session: &mut S,
    callbacks: &mut CallbackList,
    epochs: usize,
    learning_rate: f64,
) -> Result<History> {
    if epochs == 0 {
        return Err(Error::Training("epochs must be positive".to_string()));
    }

    let mut lr = learning_rate;
    let mut history = History::default();
    let start = Instant::now();

    callbacks.on_train_begin()?;

    for epoch in 1..=epochs {
        let epoch_start = Instant::now();
        let train = session.train_epoch(epoch, lr)?;
        let val = session.validate(epoch)?;
        let logs = EpochLogs::new(epoch, lr, train, val);

        info!(
            "Epoch {}/{} ({}): loss {:.4} - binary_accuracy {:.4} - auc {:.4} - val_loss {:.4} - val_binary_accuracy {:.4} - val_auc {:.4} - lr {:e}",
            epoch,
            epochs,
            format_duration(epoch_start.elapsed().as_secs_f64()),
            logs.loss,
            logs.binary_accuracy,
            logs.auc,
            logs.val_loss,
            logs.val_binary_accuracy,
            logs.val_auc,
            logs.lr
        );
        history.epochs.push(logs.clone());

        let histograms = if callbacks.wants_histograms() {
            session.weight_histograms()
        } else {
            Vec::new()
        };

        let mut stop = false;
        for action in callbacks.on_epoch_end(&logs, &histograms)? {
            match action {
                CallbackAction::SaveCheckpoint { path } => {
                    session.save_checkpoint(&path, &logs)?;
                }
                CallbackAction::SnapshotWeights => session.snapshot(),
                CallbackAction::StopTraining { restore_snapshot } => {
                    stop = true;
                    if restore_snapshot && !session.restore_snapshot() {
                        warn!("No weight snapshot to restore");
                    }
                }
                CallbackAction::SetLearningRate(new_lr) => lr = new_lr,
            }
        }

        if stop {
            history.stopped_epoch = Some(epoch);
            break;
        }
    }

    info!(
        "Training finished after {} epochs in {}",
        history.len(),
        format_duration(start.elapsed().as_secs_f64())
    );
    callbacks.on_train_end(&history)?;

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::checkpoint::ModelCheckpoint;
    use crate::training::early_stopping::EarlyStopping;
    use crate::training::scheduler::ReduceLrOnPlateau;
    use std::cell::RefCell;
    use std::path::PathBuf;

    /// Session with a scripted validation-loss curve. The "weights" are the
    /// number of the epoch that last trained them.
    struct ScriptedSession {
        val_losses: Vec<f64>,
        weights: usize,
        snapshot: Option<usize>,
        lrs: Vec<f64>,
        saved: RefCell<Vec<PathBuf>>,
    }

    impl ScriptedSession {
        fn new(val_losses: Vec<f64>) -> Self {
            Self {
                val_losses,
                weights: 0,
                snapshot: None,
                lrs: Vec::new(),
                saved: RefCell::new(Vec::new()),
            }
        }
    }

    fn summary(loss: f64) -> MetricSummary {
        MetricSummary {
            loss,
            binary_accuracy: 0.5,
            auc: 0.5,
        }
    }

    impl TrainingSession for ScriptedSession {
        fn train_epoch(&mut self, epoch: usize, lr: f64) -> Result<MetricSummary> {
            self.weights = epoch;
            self.lrs.push(lr);
            Ok(summary(1.0))
        }

        fn validate(&mut self, epoch: usize) -> Result<MetricSummary> {
            let loss = self.val_losses.get(epoch - 1).copied().unwrap_or(1.0);
            Ok(summary(loss))
        }

        fn snapshot(&mut self) {
            self.snapshot = Some(self.weights);
        }

        fn restore_snapshot(&mut self) -> bool {
            match self.snapshot {
                Some(w) => {
                    self.weights = w;
                    true
                }
                None => false,
            }
        }

        fn save_checkpoint(&self, path: &Path, _logs: &EpochLogs) -> Result<()> {
            self.saved.borrow_mut().push(path.to_path_buf());
            Ok(())
        }

        fn weight_histograms(&self) -> Vec<WeightHistogram> {
            Vec::new()
        }
    }

    #[test]
    fn test_early_stopping_restores_best_epoch() {
        // best val_loss at epoch 3, then a plateau
        let mut losses = vec![0.9, 0.8, 0.5];
        losses.extend(std::iter::repeat(0.6).take(20));
        let mut session = ScriptedSession::new(losses);
        let mut callbacks = CallbackList::new().with(EarlyStopping::new(10));

        let history = fit(&mut session, &mut callbacks, 50, 1e-4).unwrap();

        assert_eq!(history.len(), 13);
        assert_eq!(history.stopped_epoch, Some(13));
        assert_eq!(session.weights, 3);
        assert_eq!(history.best().unwrap().epoch, 3);
    }

    #[test]
    fn test_runs_all_epochs_while_improving() {
        let losses: Vec<f64> = (0..5).map(|i| 1.0 - i as f64 * 0.1).collect();
        let mut session = ScriptedSession::new(losses);
        let mut callbacks = CallbackList::new().with(EarlyStopping::new(2));

        let history = fit(&mut session, &mut callbacks, 5, 1e-4).unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history.stopped_epoch, None);
        assert_eq!(session.weights, 5);
    }

    #[test]
    fn test_plateau_decays_learning_rate() {
        let mut session = ScriptedSession::new(vec![0.5; 12]);
        let mut callbacks = CallbackList::new().with(ReduceLrOnPlateau::new(0.2, 5, 1e-6));

        let history = fit(&mut session, &mut callbacks, 12, 1e-4).unwrap();

        // epoch 1 sets the best; epochs 2..=6 stagnate, decay applies from epoch 7
        assert!(session.lrs[..6].iter().all(|&lr| lr == 1e-4));
        assert!((session.lrs[6] - 2e-5).abs() < 1e-15);
        // second decay after five more stagnant epochs
        assert!((session.lrs[11] - 4e-6).abs() < 1e-15);
        assert_eq!(history.metric("lr").len(), 12);
    }

    #[test]
    fn test_checkpoint_actions_reach_session() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = ScriptedSession::new(vec![0.5, 0.4, 0.6]);
        let mut callbacks = CallbackList::new()
            .with(ModelCheckpoint::every_epoch(dir.path()))
            .with(ModelCheckpoint::best_only(dir.path()));

        fit(&mut session, &mut callbacks, 3, 1e-3).unwrap();

        let saved: Vec<PathBuf> = session.saved.borrow().clone();
        let expected: Vec<PathBuf> = [
            "model_epoch_01",
            "best_model",
            "model_epoch_02",
            "best_model",
            "model_epoch_03",
        ]
        .iter()
        .map(|name| dir.path().join(name))
        .collect();
        assert_eq!(saved, expected);
    }

    #[test]
    fn test_zero_epochs_is_error() {
        let mut session = ScriptedSession::new(vec![]);
        let mut callbacks = CallbackList::new();
        assert!(matches!(
            fit(&mut session, &mut callbacks, 0, 1e-3),
            Err(Error::Training(_))
        ));
    }
}
