//! Learning-rate decay on `val_loss` plateaus

use tracing::info;

use crate::config::CallbackParams;
use crate::training::callbacks::{CallbackAction, EpochLogs, EpochObserver};
use crate::utils::error::Result;
use crate::utils::metrics::WeightHistogram;

/// Multiplies the learning rate by `factor` after `patience` epochs without
/// a `val_loss` improvement of at least `min_delta`, never going below
/// `min_lr`
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    min_delta: f64,
    cooldown: usize,
    best: f64,
    wait: usize,
    cooldown_counter: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f64, patience: usize, min_lr: f64) -> Self {
        Self {
            factor,
            patience,
            min_lr,
            min_delta: 1e-4,
            cooldown: 0,
            best: f64::INFINITY,
            wait: 0,
            cooldown_counter: 0,
        }
    }

    pub fn from_params(params: &CallbackParams) -> Self {
        Self::new(params.lr_factor, params.lr_patience, params.min_lr)
    }

    pub fn with_cooldown(mut self, cooldown: usize) -> Self {
        self.cooldown = cooldown;
        self
    }

    fn in_cooldown(&self) -> bool {
        self.cooldown_counter > 0
    }
}

impl EpochObserver for ReduceLrOnPlateau {
    fn name(&self) -> &'static str {
        "ReduceLrOnPlateau"
    }

    fn on_train_begin(&mut self) -> Result<()> {
        self.best = f64::INFINITY;
        self.wait = 0;
        self.cooldown_counter = 0;
        Ok(())
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, _histograms: &[WeightHistogram]) -> Result<Vec<CallbackAction>> {
        let current = logs.val_loss;

        if self.in_cooldown() {
            self.cooldown_counter -= 1;
            self.wait = 0;
        }

        if current < self.best - self.min_delta {
            self.best = current;
            self.wait = 0;
        } else if !self.in_cooldown() {
            self.wait += 1;
            if self.wait >= self.patience {
                let old_lr = logs.lr;
                self.cooldown_counter = self.cooldown;
                self.wait = 0;
                if old_lr > self.min_lr {
                    let new_lr = (old_lr * self.factor).max(self.min_lr);
                    info!("Epoch {}: reducing learning rate to {:e}", logs.epoch, new_lr);
                    return Ok(vec![CallbackAction::SetLearningRate(new_lr)]);
                }
            }
        }

        Ok(Vec::new())
    }
}
