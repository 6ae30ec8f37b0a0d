//! Pipeline stages
//!
//! Training mode runs: prepare data → build model → fit → evaluate test
//! split. Each stage returns its own error kind so the binary can exit with
//! a stage-specific code. Dashboard mode touches neither data nor model.

use std::path::{Path, PathBuf};

use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use tracing::info;

use crate::config::PipelineConfig;
use crate::dataset::DatasetPreparer;
use crate::model::ModelAssembler;
use crate::training::metrics_logger::{EventRecord, EventWriter};
use crate::training::{default_callbacks, fit, History, Trainer};
use crate::utils::error::Result;
use crate::utils::metrics::MetricSummary;

/// What the binary does, chosen by the `TRAIN_MODEL` variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Train,
    Dashboard,
}

impl RunMode {
    /// Absent or case-insensitive `true` → train, anything else → dashboard
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            None => RunMode::Train,
            Some(v) if v.eq_ignore_ascii_case("true") => RunMode::Train,
            Some(_) => RunMode::Dashboard,
        }
    }

    /// Read `TRAIN_MODEL` from the environment
    pub fn from_env() -> Self {
        let value = std::env::var(crate::TRAIN_MODE_ENV).ok();
        Self::from_env_value(value.as_deref())
    }
}

/// Outcome of a training run
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub history: History,
    pub test: MetricSummary,
    /// Metrics log directory of this run
    pub run_dir: PathBuf,
}

/// What a [`run`] did
#[derive(Debug)]
pub enum RunOutcome {
    Trained(TrainingReport),
    /// The dashboard launcher returned
    Served,
}

/// Dispatch on `mode`
///
/// `launch_dashboard` receives the log directory and blocks for as long as
/// the dashboard should run.
pub fn run<B, F>(
    config: &PipelineConfig,
    mode: RunMode,
    device: B::Device,
    show_progress: bool,
    launch_dashboard: F,
) -> Result<RunOutcome>
where
    B: AutodiffBackend,
    F: FnOnce(&Path) -> Result<()>,
{
    match mode {
        RunMode::Train => run_training::<B>(config, device, show_progress).map(RunOutcome::Trained),
        RunMode::Dashboard => {
            println!("{}", "Starting dashboard...".cyan().bold());
            launch_dashboard(&config.log_dir)?;
            Ok(RunOutcome::Served)
        }
    }
}

/// Train the head, then evaluate the test split once
pub fn run_training<B: AutodiffBackend>(
    config: &PipelineConfig,
    device: B::Device,
    show_progress: bool,
) -> Result<TrainingReport> {
    println!("{}", "Preparing data...".cyan().bold());
    let splits = DatasetPreparer::new(config).prepare()?;
    let mut test = splits.test;

    println!("{}", "Building model...".cyan().bold());
    let assembler = ModelAssembler::new(config);
    let model = assembler.build::<B>(&device)?;
    println!("{}", assembler.summary(&model));

    let mut trainer = Trainer::with_adam(model, splits.train, splits.validation, device)
        .with_backbone_name(config.backbone.to_string())
        .with_progress(show_progress);

    let (mut callbacks, run_dir) = default_callbacks(config);
    info!("Callbacks: {}", callbacks.names().join(", "));

    println!("{}", "Training...".green().bold());
    let history = fit(&mut trainer, &mut callbacks, config.epochs, config.learning_rate)?;

    println!("{}", "Evaluating on test data...".cyan().bold());
    let test_metrics = trainer.evaluate(&mut test)?;
    info!(
        "Test: loss {:.4} - binary_accuracy {:.4} - auc {:.4}",
        test_metrics.loss, test_metrics.binary_accuracy, test_metrics.auc
    );

    let step = history.len();
    EventWriter::open(&run_dir)?.append(&[
        EventRecord::scalar(step, "test_loss", test_metrics.loss),
        EventRecord::scalar(step, "test_binary_accuracy", test_metrics.binary_accuracy),
        EventRecord::scalar(step, "test_auc", test_metrics.auc),
    ])?;

    Ok(TrainingReport {
        history,
        test: test_metrics,
        run_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::test_config;
    use crate::Error;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use std::cell::RefCell;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_mode_from_env_value() {
        assert_eq!(RunMode::from_env_value(None), RunMode::Train);
        assert_eq!(RunMode::from_env_value(Some("true")), RunMode::Train);
        assert_eq!(RunMode::from_env_value(Some("TRUE")), RunMode::Train);
        assert_eq!(RunMode::from_env_value(Some(" true")), RunMode::Dashboard);
        assert_eq!(RunMode::from_env_value(Some("true\n")), RunMode::Dashboard);
        assert_eq!(RunMode::from_env_value(Some("false")), RunMode::Dashboard);
        assert_eq!(RunMode::from_env_value(Some("1")), RunMode::Dashboard);
        assert_eq!(RunMode::from_env_value(Some("")), RunMode::Dashboard);
    }

    #[test]
    fn test_dashboard_mode_builds_nothing() {
        // no data and no weights: any training stage would fail
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let launched = RefCell::new(None);

        let outcome = run::<TestBackend, _>(&config, RunMode::Dashboard, Default::default(), false, |log_dir| {
            *launched.borrow_mut() = Some(log_dir.to_path_buf());
            Ok(())
        })
        .unwrap();

        assert!(matches!(outcome, RunOutcome::Served));
        assert_eq!(launched.into_inner(), Some(config.log_dir.clone()));
        assert!(!config.model_save_path.exists());
        assert!(!config.log_dir.exists());
    }

    #[test]
    fn test_dashboard_errors_propagate() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());

        let err = run::<TestBackend, _>(&config, RunMode::Dashboard, Default::default(), false, |_| {
            Err(Error::Dashboard("address in use".to_string()))
        })
        .unwrap_err();
        assert_eq!(err.exit_status(), 6);
    }

    #[test]
    fn test_train_mode_never_launches_dashboard() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let mut launched = false;

        let err = run::<TestBackend, _>(&config, RunMode::Train, Default::default(), false, |_| {
            launched = true;
            Ok(())
        })
        .unwrap_err();

        assert!(matches!(err, Error::Data(_)));
        assert!(!launched);
    }
}
