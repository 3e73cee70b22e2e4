//! Error types shared across tokwatch crates.
//!
//! [`TokwatchError`] covers the failures that are allowed to reach the user:
//! configuration problems, directory setup, and internal invariants. Log and
//! pricing faults are degraded inside `tokwatch-usage` and never show up here.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`TokwatchError`].
pub type Result<T> = std::result::Result<T, TokwatchError>;

/// Top-level error type for tokwatch operations.
#[derive(Debug, Error)]
pub enum TokwatchError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file could not be read
    #[error("Configuration not readable at {path}")]
    ConfigUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is invalid YAML
    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Directory creation failed
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Home directory could not be determined
    #[error("Home directory not found")]
    HomeNotFound,
}

impl TokwatchError {
    /// Create a ConfigValidation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigUnreadable { .. } | Self::ConfigInvalid { .. } | Self::ConfigValidation { .. }
        )
    }

    /// Returns actionable guidance for the user
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid { .. } => Some("Check YAML syntax in ~/.tokwatch/config.yaml"),
            Self::ConfigValidation { .. } => {
                Some("Intervals and concurrency limits in the config must be greater than zero")
            }
            Self::HomeNotFound => Some("Set HOME or pass explicit paths on the command line"),
            _ => None,
        }
    }
}
