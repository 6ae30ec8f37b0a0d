//! Reading the metrics log of finished and running training runs

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::training::fit::History;
use crate::training::metrics_logger::{read_events, EventRecord, EVENTS_FILE, HISTORY_FILE};
use crate::utils::error::{Error, Result};
use crate::utils::metrics::WeightHistogram;

/// One entry of `GET /runs`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub name: String,
    /// Highest step seen in the event log
    pub last_step: Option<usize>,
    pub has_history: bool,
    pub modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalarPoint {
    pub step: usize,
    pub value: f64,
    pub wall_time: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramPoint {
    pub step: usize,
    pub wall_time: f64,
    pub histogram: WeightHistogram,
}

/// Directory of `run` below `log_dir`; run names are single path components
pub fn run_dir(log_dir: &Path, run: &str) -> Result<PathBuf> {
    let valid = !run.is_empty()
        && run != "."
        && run != ".."
        && !run.contains(['/', '\\']);
    if !valid {
        return Err(Error::Dashboard(format!("invalid run name '{run}'")));
    }

    let dir = log_dir.join(run);
    if !dir.is_dir() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("run not found: {run}"),
        )));
    }
    Ok(dir)
}

fn events(dir: &Path) -> Result<Vec<EventRecord>> {
    let path = dir.join(EVENTS_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_events(&path)
}

/// Runs with an event log or a history file, newest name first
pub fn list_runs(log_dir: &Path) -> Result<Vec<RunSummary>> {
    if !log_dir.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let has_events = path.join(EVENTS_FILE).exists();
        let has_history = path.join(HISTORY_FILE).exists();
        if !path.is_dir() || !(has_events || has_history) {
            continue;
        }

        let last_step = events(&path)?
            .iter()
            .map(|record| match record {
                EventRecord::Scalar { step, .. } | EventRecord::Histogram { step, .. } => *step,
            })
            .max();
        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());

        runs.push(RunSummary {
            name: entry.file_name().to_string_lossy().to_string(),
            last_step,
            has_history,
            modified,
        });
    }

    runs.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(runs)
}

/// Scalar series of one run keyed by tag
pub fn scalars(log_dir: &Path, run: &str) -> Result<BTreeMap<String, Vec<ScalarPoint>>> {
    let dir = run_dir(log_dir, run)?;
    let mut series: BTreeMap<String, Vec<ScalarPoint>> = BTreeMap::new();

    for record in events(&dir)? {
        if let EventRecord::Scalar {
            step,
            tag,
            value,
            wall_time,
        } = record
        {
            series.entry(tag).or_default().push(ScalarPoint {
                step,
                value,
                wall_time,
            });
        }
    }
    for points in series.values_mut() {
        points.sort_by_key(|p| p.step);
    }
    Ok(series)
}

/// Histograms of one run keyed by tag
pub fn histograms(log_dir: &Path, run: &str) -> Result<BTreeMap<String, Vec<HistogramPoint>>> {
    let dir = run_dir(log_dir, run)?;
    let mut series: BTreeMap<String, Vec<HistogramPoint>> = BTreeMap::new();

    for record in events(&dir)? {
        if let EventRecord::Histogram {
            step,
            wall_time,
            histogram,
        } = record
        {
            series
                .entry(histogram.tag.clone())
                .or_default()
                .push(HistogramPoint {
                    step,
                    wall_time,
                    histogram,
                });
        }
    }
    Ok(series)
}

/// `history.json` of a run, absent while the run is still going
pub fn history(log_dir: &Path, run: &str) -> Result<Option<History>> {
    let path = run_dir(log_dir, run)?.join(HISTORY_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&json)?))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::training::callbacks::tests::logs;
    use crate::training::metrics_logger::EventWriter;
    use tempfile::TempDir;

    /// Log dir with one finished run and one run without history
    pub(crate) fn sample_log_dir() -> TempDir {
        let dir = TempDir::new().unwrap();

        let finished = EventWriter::open(dir.path().join("run-20240101-000000")).unwrap();
        finished
            .append(&[
                EventRecord::scalar(2, "epoch_loss", 0.4),
                EventRecord::scalar(1, "epoch_loss", 0.6),
                EventRecord::scalar(1, "epoch_val_loss", 0.7),
                EventRecord::histogram(1, WeightHistogram::from_values("output/kernel", &[0.1, -0.1], 2)),
            ])
            .unwrap();
        finished
            .write_history(&History::from_epochs(vec![logs(1, 0.7), logs(2, 0.5)]))
            .unwrap();

        let running = EventWriter::open(dir.path().join("run-20240102-000000")).unwrap();
        running
            .append(&[EventRecord::scalar(1, "epoch_loss", 0.9)])
            .unwrap();

        fs::create_dir_all(dir.path().join("not-a-run")).unwrap();
        dir
    }

    #[test]
    fn test_list_runs_newest_first() {
        let dir = sample_log_dir();
        let runs = list_runs(dir.path()).unwrap();

        let names: Vec<&str> = runs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["run-20240102-000000", "run-20240101-000000"]);
        assert_eq!(runs[1].last_step, Some(2));
        assert!(runs[1].has_history);
        assert!(!runs[0].has_history);
    }

    #[test]
    fn test_list_runs_missing_log_dir() {
        let dir = TempDir::new().unwrap();
        assert!(list_runs(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_scalars_grouped_and_sorted() {
        let dir = sample_log_dir();
        let series = scalars(dir.path(), "run-20240101-000000").unwrap();

        let loss: Vec<usize> = series["epoch_loss"].iter().map(|p| p.step).collect();
        assert_eq!(loss, vec![1, 2]);
        assert_eq!(series["epoch_val_loss"].len(), 1);
    }

    #[test]
    fn test_histograms_and_history() {
        let dir = sample_log_dir();
        let hists = histograms(dir.path(), "run-20240101-000000").unwrap();
        assert_eq!(hists["output/kernel"][0].histogram.count, 2);

        assert_eq!(history(dir.path(), "run-20240101-000000").unwrap().unwrap().len(), 2);
        assert!(history(dir.path(), "run-20240102-000000").unwrap().is_none());
    }

    #[test]
    fn test_run_names_cannot_escape_log_dir() {
        let dir = sample_log_dir();
        for bad in ["..", "a/b", ""] {
            assert!(matches!(scalars(dir.path(), bad), Err(Error::Dashboard(_))));
        }
        assert!(matches!(
            scalars(dir.path(), "missing"),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound
        ));
    }
}
