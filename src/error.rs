//! Error types at the worker's seams

use thiserror::Error;

/// Failure of a grading lifecycle step
#[derive(Debug, Error)]
pub enum GradingError {
    /// The submission did not produce a runnable program
    #[error("compilation failed")]
    Compile(String),

    /// A termination request was observed at a case boundary
    #[error("grading terminated")]
    Terminated,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Failure reported by an executor
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("compilation failed")]
    Compile(String),

    /// The execution unit was killed by an abort request
    #[error("execution aborted")]
    Aborted,

    #[error("sandbox failure: {0:#}")]
    Sandbox(#[from] anyhow::Error),
}

impl From<ExecError> for GradingError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Compile(log) => GradingError::Compile(log),
            ExecError::Aborted => GradingError::Terminated,
            ExecError::Sandbox(e) => GradingError::Internal(e),
        }
    }
}

/// Malformed job message
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("malformed job message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl IntakeError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        IntakeError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
