//! Metrics Module for Binary Classification
//!
//! Provides the metrics tracked during fitting:
//! - Binary accuracy (probability threshold 0.5)
//! - ROC AUC approximated over a fixed grid of thresholds
//! - Weight histograms for the metrics event log

use serde::{Deserialize, Serialize};

/// Number of thresholds used for the AUC approximation
pub const AUC_NUM_THRESHOLDS: usize = 200;

/// Decision threshold for binary accuracy
pub const ACCURACY_THRESHOLD: f32 = 0.5;

const THRESHOLD_EPSILON: f32 = 1e-7;

/// Streaming ROC AUC over a fixed threshold grid
///
/// The grid spans `[-eps, 1/(n-1), ..., (n-2)/(n-1), 1+eps]` so that the
/// extreme thresholds classify everything positive / negative.
#[derive(Debug, Clone)]
pub struct AucAccumulator {
    thresholds: Vec<f32>,
    true_positives: Vec<u64>,
    false_positives: Vec<u64>,
    true_negatives: Vec<u64>,
    false_negatives: Vec<u64>,
}

impl Default for AucAccumulator {
    fn default() -> Self {
        Self::new(AUC_NUM_THRESHOLDS)
    }
}

impl AucAccumulator {
    /// Create an accumulator with `num_thresholds` thresholds (at least 3)
    pub fn new(num_thresholds: usize) -> Self {
        let n = num_thresholds.max(3);
        let mut thresholds = Vec::with_capacity(n);
        thresholds.push(-THRESHOLD_EPSILON);
        for i in 1..n - 1 {
            thresholds.push(i as f32 / (n - 1) as f32);
        }
        thresholds.push(1.0 + THRESHOLD_EPSILON);

        Self {
            thresholds,
            true_positives: vec![0; n],
            false_positives: vec![0; n],
            true_negatives: vec![0; n],
            false_negatives: vec![0; n],
        }
    }

    /// Accumulate a batch of predicted probabilities and 0/1 labels
    pub fn update(&mut self, probabilities: &[f32], labels: &[f32]) {
        for (&p, &y) in probabilities.iter().zip(labels) {
            let positive = y > 0.5;
            for (i, &t) in self.thresholds.iter().enumerate() {
                match (p > t, positive) {
                    (true, true) => self.true_positives[i] += 1,
                    (true, false) => self.false_positives[i] += 1,
                    (false, false) => self.true_negatives[i] += 1,
                    (false, true) => self.false_negatives[i] += 1,
                }
            }
        }
    }

    /// Area under the ROC curve (trapezoidal rule over the threshold grid)
    pub fn result(&self) -> f64 {
        let rate = |num: u64, other: u64| {
            let denom = num + other;
            if denom == 0 {
                0.0
            } else {
                num as f64 / denom as f64
            }
        };

        let tpr: Vec<f64> = (0..self.thresholds.len())
            .map(|i| rate(self.true_positives[i], self.false_negatives[i]))
            .collect();
        let fpr: Vec<f64> = (0..self.thresholds.len())
            .map(|i| rate(self.false_positives[i], self.true_negatives[i]))
            .collect();

        tpr.windows(2)
            .zip(fpr.windows(2))
            .map(|(t, f)| (f[0] - f[1]) * (t[0] + t[1]) / 2.0)
            .sum()
    }
}

/// Per-epoch accumulator for loss, binary accuracy and AUC
#[derive(Debug, Clone, Default)]
pub struct BinaryMetrics {
    loss_sum: f64,
    samples: usize,
    correct: usize,
    auc: AucAccumulator,
}

impl BinaryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one batch. `loss` is the batch-mean loss.
    pub fn update(&mut self, loss: f64, probabilities: &[f32], labels: &[f32]) {
        let n = probabilities.len();
        self.loss_sum += loss * n as f64;
        self.samples += n;
        self.correct += probabilities
            .iter()
            .zip(labels)
            .filter(|(&p, &y)| (p > ACCURACY_THRESHOLD) == (y > 0.5))
            .count();
        self.auc.update(probabilities, labels);
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Sample-weighted mean loss
    pub fn loss(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.loss_sum / self.samples as f64
        }
    }

    pub fn binary_accuracy(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.correct as f64 / self.samples as f64
        }
    }

    pub fn auc(&self) -> f64 {
        self.auc.result()
    }

    pub fn summary(&self) -> MetricSummary {
        MetricSummary {
            loss: self.loss(),
            binary_accuracy: self.binary_accuracy(),
            auc: self.auc(),
        }
    }
}

/// Final values of the tracked metrics for one pass over a data source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub loss: f64,
    pub binary_accuracy: f64,
    pub auc: f64,
}

/// Histogram of a weight tensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightHistogram {
    pub tag: String,
    pub min: f64,
    pub max: f64,
    pub count: usize,
    pub sum: f64,
    pub sum_squares: f64,
    /// Right edge of each bucket
    pub bucket_limits: Vec<f64>,
    pub bucket_counts: Vec<u64>,
}

impl WeightHistogram {
    /// Default bucket count, same as TensorBoard's summary writer
    pub const DEFAULT_BUCKETS: usize = 30;

    /// Build an equal-width histogram over the value range
    pub fn from_values(tag: impl Into<String>, values: &[f32], buckets: usize) -> Self {
        let buckets = buckets.max(1);
        let (min, max) = values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v as f64), hi.max(v as f64))
        });

        if values.is_empty() {
            return Self {
                tag: tag.into(),
                min: 0.0,
                max: 0.0,
                count: 0,
                sum: 0.0,
                sum_squares: 0.0,
                bucket_limits: Vec::new(),
                bucket_counts: Vec::new(),
            };
        }

        let width = if max > min { (max - min) / buckets as f64 } else { 1.0 };
        let mut bucket_counts = vec![0u64; buckets];
        let mut sum = 0.0;
        let mut sum_squares = 0.0;
        for &v in values {
            let v = v as f64;
            sum += v;
            sum_squares += v * v;
            let idx = (((v - min) / width) as usize).min(buckets - 1);
            bucket_counts[idx] += 1;
        }
        let bucket_limits = (1..=buckets).map(|i| min + width * i as f64).collect();

        Self {
            tag: tag.into(),
            min,
            max,
            count: values.len(),
            sum,
            sum_squares,
            bucket_limits,
            bucket_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_separation_auc() {
        let mut auc = AucAccumulator::default();
        auc.update(&[0.1, 0.2, 0.8, 0.9], &[0.0, 0.0, 1.0, 1.0]);
        assert!((auc.result() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_inverted_predictions_auc() {
        let mut auc = AucAccumulator::default();
        auc.update(&[0.9, 0.8, 0.2, 0.1], &[0.0, 0.0, 1.0, 1.0]);
        assert!(auc.result() < 1e-6);
    }

    #[test]
    fn test_constant_predictions_auc_is_half() {
        let mut auc = AucAccumulator::default();
        auc.update(&[0.5, 0.5, 0.5, 0.5], &[0.0, 1.0, 0.0, 1.0]);
        assert!((auc.result() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_binary_metrics_accumulate_across_batches() {
        let mut metrics = BinaryMetrics::new();
        metrics.update(1.0, &[0.9, 0.1], &[1.0, 1.0]);
        metrics.update(0.5, &[0.2, 0.3, 0.7, 0.6], &[0.0, 0.0, 1.0, 1.0]);

        assert_eq!(metrics.samples(), 6);
        // (1.0 * 2 + 0.5 * 4) / 6
        assert!((metrics.loss() - 4.0 / 6.0).abs() < 1e-9);
        assert!((metrics.binary_accuracy() - 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = BinaryMetrics::new();
        assert_eq!(metrics.loss(), 0.0);
        assert_eq!(metrics.binary_accuracy(), 0.0);
    }

    #[test]
    fn test_histogram_counts() {
        let values: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let hist = WeightHistogram::from_values("w", &values, 10);

        assert_eq!(hist.count, 100);
        assert_eq!(hist.bucket_counts.iter().sum::<u64>(), 100);
        assert_eq!(hist.bucket_limits.len(), 10);
        assert!((hist.min - 0.0).abs() < 1e-9);
        assert!((hist.max - 0.99).abs() < 1e-6);
    }

    #[test]
    fn test_histogram_constant_values() {
        let hist = WeightHistogram::from_values("bias", &[0.0; 8], 30);
        assert_eq!(hist.bucket_counts[0], 8);
    }
}
