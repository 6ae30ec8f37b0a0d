//! Error Handling Module
//!
//! Defines the error type shared by every pipeline stage. Each variant maps
//! to a distinct process exit code so the driver can report which stage
//! failed.

use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

/// Main error type for the transfer-learning pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be read, parsed or validated
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dataset directory layout or content problem
    #[error("Data error: {0}")]
    Data(String),

    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    Image(PathBuf, String),

    /// Model construction or weight loading failed
    #[error("Model error: {0}")]
    Model(String),

    /// Failure inside the fit loop
    #[error("Training error: {0}")]
    Training(String),

    /// Visualization server failure
    #[error("Dashboard error: {0}")]
    Dashboard(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Numeric exit status for this error kind
    pub fn exit_status(&self) -> u8 {
        match self {
            Error::Io(_) | Error::Serialization(_) => 1,
            Error::Config(_) => 2,
            Error::Data(_) | Error::Image(..) => 3,
            Error::Model(_) => 4,
            Error::Training(_) => 5,
            Error::Dashboard(_) => 6,
        }
    }

    /// Process exit code for this error kind
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Convenience Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Data("no samples found".to_string());
        assert_eq!(format!("{}", err), "Data error: no samples found");
    }

    #[test]
    fn test_image_error_mentions_path() {
        let err = Error::Image(PathBuf::from("/data/cat/001.jpg"), "truncated".to_string());
        assert!(err.to_string().contains("001.jpg"));
    }

    #[test]
    fn test_exit_codes_are_distinct_per_stage() {
        let codes = [
            Error::Config(String::new()).exit_status(),
            Error::Data(String::new()).exit_status(),
            Error::Model(String::new()).exit_status(),
            Error::Training(String::new()).exit_status(),
            Error::Dashboard(String::new()).exit_status(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert!(codes.iter().all(|&c| c != 0));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
