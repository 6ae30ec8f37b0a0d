//! Transfer-learning classifier CLI
//!
//! Trains the classification head described by the configuration file, or,
//! when `TRAIN_MODEL` is set to anything but `true`, serves the logged
//! metrics over HTTP.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing::{error, info};

use transfer_classifier::backend::{backend_name, default_device, TrainingBackend};
use transfer_classifier::dashboard::{self, DEFAULT_HOST, DEFAULT_PORT};
use transfer_classifier::utils::logging::{init_logging, LogConfig};
use transfer_classifier::pipeline::{self, RunOutcome};
use transfer_classifier::{PipelineConfig, Result, RunMode};

/// Transfer-learning binary image classifier
///
/// Set TRAIN_MODEL=false to start the metrics dashboard instead of training.
#[derive(Parser, Debug)]
#[command(name = "transfer_classifier")]
#[command(version)]
#[command(about = "Frozen ResNet backbone + dense head, trained with Burn", long_about = None)]
struct Cli {
    /// Pipeline configuration (.yaml, .yml or .toml)
    #[arg(short, long, default_value = "config.yaml", env = "TRANSFER_CLASSIFIER_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Dashboard bind host
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Dashboard port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn print_banner(mode: RunMode) {
    println!(
        "{} v{}",
        "transfer_classifier".green().bold(),
        transfer_classifier::VERSION
    );
    match mode {
        RunMode::Train => println!("  Mode:    {}", "training".cyan()),
        RunMode::Dashboard => println!("  Mode:    {}", "dashboard".cyan()),
    }
    println!("  Backend: {}", backend_name());
    println!();
}

fn run(cli: &Cli, mode: RunMode) -> Result<()> {
    let config = PipelineConfig::load(&cli.config)?;
    config.log_summary();

    let outcome = pipeline::run::<TrainingBackend, _>(&config, mode, default_device(), true, |log_dir| {
        dashboard::serve(log_dir.to_path_buf(), &cli.host, cli.port)
    })?;

    match outcome {
        RunOutcome::Trained(report) => {
            println!();
            println!("{}", "Training complete".green().bold());
            if let Some(best) = report.history.best() {
                println!(
                    "  Best epoch:  {} (val_loss {:.4}, val_auc {:.4})",
                    best.epoch, best.val_loss, best.val_auc
                );
            }
            if let Some(stopped) = report.history.stopped_epoch {
                println!("  Stopped early at epoch {}", stopped);
            }
            println!(
                "  Test:        loss {:.4}, binary_accuracy {:.4}, auc {:.4}",
                report.test.loss, report.test.binary_accuracy, report.test.auc
            );
            println!("  Metrics:     {}", report.run_dir.display());
        }
        RunOutcome::Served => info!("Dashboard stopped"),
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&LogConfig::from_verbosity(cli.verbose)) {
        eprintln!("{e}");
    }

    let mode = RunMode::from_env();
    print_banner(mode);

    match run(&cli, mode) {
        Ok(()) => {
            info!("Done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    }
}
