use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort a pipeline stage.
///
/// "No bet" conditions in the backtest are not errors; they surface as
/// warnings in the summary report instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required table or file is absent or empty.
    #[error("missing {what} at {}: expected {expected}", path.display())]
    MissingData {
        what: String,
        path: PathBuf,
        expected: String,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An input row could not be parsed into the canonical schema.
    #[error("{file}:{line}: {reason}")]
    MalformedRow {
        file: String,
        line: usize,
        reason: String,
    },

    /// Not enough labeled rows (or only one class) to fit a model.
    #[error("insufficient training data: {0}")]
    InsufficientData(String),

    /// A persisted artifact does not match the current feature schema.
    #[error("artifact {artifact} was trained on {found:?}, expected {expected:?}")]
    ArtifactMismatch {
        artifact: String,
        expected: Vec<String>,
        found: Vec<String>,
    },
}

impl PipelineError {
    pub fn missing(what: impl Into<String>, path: impl Into<PathBuf>, expected: impl Into<String>) -> Self {
        PipelineError::MissingData {
            what: what.into(),
            path: path.into(),
            expected: expected.into(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        PipelineError::InvalidConfig(msg.into())
    }
}
