//! Error types for model building, data handling and walk-forward runs.

use thiserror::Error;

/// Main error type for the crate.
///
/// Solver infeasibility at a single grid point is not an error: the sweep logs
/// it and moves on. Degenerate metrics (zero denominators) surface as NaN or
/// infinite values rather than errors.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Data alignment error: {0}")]
    DataAlignment(String),

    #[error("Cannot construct windows: {reason} (required {required} observations, available {available})")]
    WindowConstruction {
        required: usize,
        available: usize,
        reason: String,
    },

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
