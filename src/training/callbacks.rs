//! Epoch observers
//!
//! Observers inspect the logs of a finished epoch and answer with actions
//! (`CallbackAction`) that the fit loop applies in order. They never touch the
//! model directly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::training::History;
use crate::utils::error::Result;
use crate::utils::metrics::{MetricSummary, WeightHistogram};

/// Metrics of one finished epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    /// 1-based epoch number
    pub epoch: usize,
    pub loss: f64,
    pub binary_accuracy: f64,
    pub auc: f64,
    pub val_loss: f64,
    pub val_binary_accuracy: f64,
    pub val_auc: f64,
    /// Learning rate used during the epoch
    pub lr: f64,
}

impl EpochLogs {
    pub fn new(epoch: usize, lr: f64, train: MetricSummary, val: MetricSummary) -> Self {
        Self {
            epoch,
            loss: train.loss,
            binary_accuracy: train.binary_accuracy,
            auc: train.auc,
            val_loss: val.loss,
            val_binary_accuracy: val.binary_accuracy,
            val_auc: val.auc,
            lr,
        }
    }

    /// Scalar values by name, in a stable order
    pub fn scalars(&self) -> [(&'static str, f64); 7] {
        [
            ("loss", self.loss),
            ("binary_accuracy", self.binary_accuracy),
            ("auc", self.auc),
            ("val_loss", self.val_loss),
            ("val_binary_accuracy", self.val_binary_accuracy),
            ("val_auc", self.val_auc),
            ("lr", self.lr),
        ]
    }
}

/// Request from an observer to the fit loop
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAction {
    /// Save the model (the recorder appends the extension)
    SaveCheckpoint { path: PathBuf },
    /// Remember the current weights
    SnapshotWeights,
    /// End training after this epoch
    StopTraining { restore_snapshot: bool },
    /// Use a new learning rate from the next epoch on
    SetLearningRate(f64),
}

/// Hook invoked at the end of every epoch
pub trait EpochObserver {
    fn name(&self) -> &'static str;

    fn on_train_begin(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether `on_epoch_end` reads the weight histograms
    fn wants_histograms(&self) -> bool {
        false
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, histograms: &[WeightHistogram]) -> Result<Vec<CallbackAction>>;

    fn on_train_end(&mut self, _history: &History) -> Result<()> {
        Ok(())
    }
}

/// Ordered set of observers
#[derive(Default)]
pub struct CallbackList {
    observers: Vec<Box<dyn EpochObserver>>,
}

impl CallbackList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: impl EpochObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn with(mut self, observer: impl EpochObserver + 'static) -> Self {
        self.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.observers.iter().map(|o| o.name()).collect()
    }

    pub fn wants_histograms(&self) -> bool {
        self.observers.iter().any(|o| o.wants_histograms())
    }

    pub fn on_train_begin(&mut self) -> Result<()> {
        for observer in &mut self.observers {
            observer.on_train_begin()?;
        }
        Ok(())
    }

    /// Actions of all observers, in observer order
    pub fn on_epoch_end(&mut self, logs: &EpochLogs, histograms: &[WeightHistogram]) -> Result<Vec<CallbackAction>> {
        let mut actions = Vec::new();
        for observer in &mut self.observers {
            actions.extend(observer.on_epoch_end(logs, histograms)?);
        }
        Ok(actions)
    }

    pub fn on_train_end(&mut self, history: &History) -> Result<()> {
        for observer in &mut self.observers {
            observer.on_train_end(history)?;
        }
        Ok(())
    }
}
