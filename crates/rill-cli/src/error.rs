//! CLI error handling.
//!
//! A hierarchical error type over `thiserror`: broad categories at the top
//! level, automatic conversion from engine and I/O errors via `#[from]`,
//! and hint-bearing messages so failures are actionable from the terminal.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file problems.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors surfaced by the build engine.
    #[error("Build error: {0}")]
    Engine(#[from] rill_core::Error),

    /// Invalid command-line arguments.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// File or directory not found.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// I/O errors from file system operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watching errors.
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// JSON serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file doesn't exist.
    #[error("Config file not found: {}\n\nHint: create a rill.json or drop the --config flag", .0.display())]
    NotFound(PathBuf),

    /// The config file isn't valid JSON for our schema.
    #[error("Invalid config file: {0}\n\nHint: check rill.json against the documented fields")]
    Invalid(#[from] serde_json::Error),

    /// A field value is out of range or unknown.
    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        field: String,
        value: String,
        hint: String,
    },

    /// I/O error while reading the config.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using `CliError` as the default error type.
pub type Result<T, E = CliError> = std::result::Result<T, E>;
