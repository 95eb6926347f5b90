//! Error handling for conditioning, merging and corrections.
//!
//! Provides error types with enough context (file, column, offending
//! timestamp) for the task layer to log a failure and move on to the next
//! independent unit of work.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which expected input was absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Master,
    Backup,
    Corrections,
    ControlFile,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InputKind::Master => "master file",
            InputKind::Backup => "backup file",
            InputKind::Corrections => "corrections file",
            InputKind::ControlFile => "control file",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug)]
pub enum ConditionerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing {kind}: {path}")]
    MissingInput { kind: InputKind, path: PathBuf },

    #[error("Unrecognised file format: {path} - {reason}")]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("Invalid timestamp '{value}' at data line {line}")]
    InvalidTimestamp { value: String, line: usize },

    #[error("Schema mismatch concatenating {file}: {reason} (columns: {columns:?})")]
    SchemaMismatch {
        file: PathBuf,
        reason: String,
        columns: Vec<String>,
    },

    #[error("Alignment error: {reason} ({value})")]
    Alignment { reason: String, value: String },

    #[error("Column '{column}' is provided by more than one source: {sources:?}")]
    Collision {
        column: String,
        sources: Vec<String>,
    },

    #[error("Refusing to overwrite input file: {path}")]
    OverwriteRefused { path: PathBuf },

    #[error("Invalid corrections: {reason}")]
    InvalidCorrections { reason: String },

    #[error("Variable '{variable}' not found in control file")]
    UnknownVariable { variable: String },

    #[error("Column '{column}' not found in dataset")]
    UnknownColumn { column: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ConditionerError {
    /// True when an append was attempted against a master that does not exist
    pub fn is_missing_master(&self) -> bool {
        matches!(
            self,
            ConditionerError::MissingInput {
                kind: InputKind::Master,
                ..
            }
        )
    }

    pub(crate) fn alignment(reason: impl Into<String>, value: impl ToString) -> Self {
        ConditionerError::Alignment {
            reason: reason.into(),
            value: value.to_string(),
        }
    }

    pub(crate) fn invalid_format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ConditionerError::InvalidFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConditionerError>;
