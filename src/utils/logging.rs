//! Logging Module
//!
//! Structured logging through `tracing`. `RUST_LOG` takes precedence over the
//! level chosen on the command line.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::utils::error::{Error, Result};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            include_target: true,
            ansi_colors: true,
        }
    }

    /// Pick default or verbose settings from a CLI flag
    pub fn from_verbosity(verbose: bool) -> Self {
        if verbose {
            Self::verbose()
        } else {
            Self::default()
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()))
    }
}

/// Initialize the global subscriber
pub fn init_logging(config: &LogConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(config.include_target)
                .with_ansi(config.ansi_colors)
                .compact(),
        )
        .with(config.env_filter())
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logger: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_verbosity() {
        assert_eq!(LogConfig::from_verbosity(false).level, Level::INFO);
        assert_eq!(LogConfig::from_verbosity(true).level, Level::DEBUG);
    }
}
