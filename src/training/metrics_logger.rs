//! Metrics event log
//!
//! Each training run writes to its own directory below `log_dir`:
//!
//! ```text
//! log_dir/
//! └── run-20240101-120000/
//!     ├── events.jsonl   one JSON record per line (scalars, histograms)
//!     └── history.json   per-epoch logs, written when training ends
//! ```
//!
//! The dashboard reads the same files.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::training::callbacks::{CallbackAction, EpochLogs, EpochObserver};
use crate::training::History;
use crate::utils::error::{Error, Result};
use crate::utils::metrics::WeightHistogram;

pub const EVENTS_FILE: &str = "events.jsonl";
pub const HISTORY_FILE: &str = "history.json";

/// One line of `events.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventRecord {
    Scalar {
        step: usize,
        tag: String,
        value: f64,
        wall_time: f64,
    },
    Histogram {
        step: usize,
        wall_time: f64,
        histogram: WeightHistogram,
    },
}

impl EventRecord {
    pub fn scalar(step: usize, tag: impl Into<String>, value: f64) -> Self {
        EventRecord::Scalar {
            step,
            tag: tag.into(),
            value,
            wall_time: wall_time(),
        }
    }

    pub fn histogram(step: usize, histogram: WeightHistogram) -> Self {
        EventRecord::Histogram {
            step,
            wall_time: wall_time(),
            histogram,
        }
    }
}

fn wall_time() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Directory name of a new run
pub fn new_run_name() -> String {
    format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S"))
}

/// `log_dir/name`, or `log_dir/name-N` for the first N not taken yet
pub fn unique_run_dir(log_dir: &Path, name: &str) -> PathBuf {
    let mut dir = log_dir.join(name);
    let mut suffix = 1;
    while dir.exists() {
        dir = log_dir.join(format!("{name}-{suffix}"));
        suffix += 1;
    }
    dir
}

/// Appends records to a run's `events.jsonl`
#[derive(Debug, Clone)]
pub struct EventWriter {
    run_dir: PathBuf,
}

impl EventWriter {
    /// Create the run directory if needed
    pub fn open(run_dir: impl Into<PathBuf>) -> Result<Self> {
        let run_dir = run_dir.into();
        fs::create_dir_all(&run_dir)?;
        Ok(Self { run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn append(&self, records: &[EventRecord]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_dir.join(EVENTS_FILE))?;

        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    pub fn write_history(&self, history: &History) -> Result<()> {
        let json = serde_json::to_string_pretty(history)?;
        fs::write(self.run_dir.join(HISTORY_FILE), json)?;
        Ok(())
    }
}

/// Read every record of an events file, skipping a torn last line
pub fn read_events(path: &Path) -> Result<Vec<EventRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => debug!("Skipping malformed event at {}:{}: {}", path.display(), i + 1, e),
        }
    }
    Ok(records)
}

/// Records epoch scalars and head-weight histograms
#[derive(Debug)]
pub struct MetricsLogger {
    run_dir: PathBuf,
    writer: Option<EventWriter>,
}

impl MetricsLogger {
    /// Log into a fresh run directory below `log_dir`
    pub fn new(log_dir: &Path) -> Self {
        Self::with_run_dir(unique_run_dir(log_dir, &new_run_name()))
    }

    pub fn with_run_dir(run_dir: PathBuf) -> Self {
        Self {
            run_dir,
            writer: None,
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn writer(&self) -> Result<&EventWriter> {
        self.writer
            .as_ref()
            .ok_or_else(|| Error::Training("metrics logger used before training started".to_string()))
    }
}

impl EpochObserver for MetricsLogger {
    fn name(&self) -> &'static str {
        "MetricsLogger"
    }

    fn on_train_begin(&mut self) -> Result<()> {
        self.writer = Some(EventWriter::open(&self.run_dir)?);
        info!("Writing metrics to {}", self.run_dir.display());
        Ok(())
    }

    fn wants_histograms(&self) -> bool {
        true
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, histograms: &[WeightHistogram]) -> Result<Vec<CallbackAction>> {
        let mut records: Vec<EventRecord> = logs
            .scalars()
            .iter()
            .map(|(tag, value)| EventRecord::scalar(logs.epoch, format!("epoch_{tag}"), *value))
            .collect();

        records.extend(
            histograms
                .iter()
                .cloned()
                .map(|h| EventRecord::histogram(logs.epoch, h)),
        );

        self.writer()?.append(&records)?;
        Ok(Vec::new())
    }

    fn on_train_end(&mut self, history: &History) -> Result<()> {
        self.writer()?.write_history(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::callbacks::tests::logs;
    use tempfile::TempDir;

    #[test]
    fn test_logger_writes_scalars_and_histograms() {
        let dir = TempDir::new().unwrap();
        let mut logger = MetricsLogger::new(dir.path());
        let run_dir = logger.run_dir().to_path_buf();
        assert!(run_dir.starts_with(dir.path()));

        logger.on_train_begin().unwrap();
        let hist = WeightHistogram::from_values("dense_1/kernel", &[0.1, 0.2, 0.3], 4);
        logger.on_epoch_end(&logs(1, 0.5), &[hist]).unwrap();
        logger.on_epoch_end(&logs(2, 0.4), &[]).unwrap();

        let records = read_events(&run_dir.join(EVENTS_FILE)).unwrap();
        let scalars = records
            .iter()
            .filter(|r| matches!(r, EventRecord::Scalar { .. }))
            .count();
        let histograms = records
            .iter()
            .filter(|r| matches!(r, EventRecord::Histogram { .. }))
            .count();
        assert_eq!(scalars, 14);
        assert_eq!(histograms, 1);

        let history = History::from_epochs(vec![logs(1, 0.5), logs(2, 0.4)]);
        logger.on_train_end(&history).unwrap();
        assert!(run_dir.join(HISTORY_FILE).exists());
    }

    #[test]
    fn test_logger_requires_train_begin() {
        let dir = TempDir::new().unwrap();
        let mut logger = MetricsLogger::new(dir.path());
        assert!(logger.on_epoch_end(&logs(1, 0.5), &[]).is_err());
    }

    #[test]
    fn test_runs_started_in_the_same_second_get_their_own_dir() {
        let dir = TempDir::new().unwrap();
        let name = "run-20240101-120000";

        let first = unique_run_dir(dir.path(), name);
        assert_eq!(first, dir.path().join(name));
        fs::create_dir_all(&first).unwrap();

        let second = unique_run_dir(dir.path(), name);
        assert_eq!(second, dir.path().join("run-20240101-120000-1"));
        fs::create_dir_all(&second).unwrap();

        assert_eq!(
            unique_run_dir(dir.path(), name),
            dir.path().join("run-20240101-120000-2")
        );
    }

    #[test]
    fn test_read_events_skips_torn_line() {
        let dir = TempDir::new().unwrap();
        let writer = EventWriter::open(dir.path()).unwrap();
        writer.append(&[EventRecord::scalar(1, "epoch_loss", 0.7)]).unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(EVENTS_FILE))
            .unwrap();
        write!(file, "{{\"kind\":\"scal").unwrap();

        let records = read_events(&dir.path().join(EVENTS_FILE)).unwrap();
        assert_eq!(records.len(), 1);
    }
}
