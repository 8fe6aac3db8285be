use std::time::Duration;

use thiserror::Error;

use crate::core::job::StageKind;

/// Errors surfaced by the job store, the orchestrator and the submission API.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("job '{0}' already exists")]
    DuplicateJob(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{stage} stage failed: {message}")]
    StageExecution { stage: StageKind, message: String },
}

impl PipelineError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

/// Unrecoverable failure inside a single stage executor.
#[derive(Debug, Error)]
pub enum StageError {
    /// An external collaborator (LLM, fetch, warehouse, agent API) failed.
    #[error("{0}")]
    Collaborator(String),

    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    #[error("missing input: {0} has not been produced yet")]
    MissingInput(&'static str),

    #[error("only {succeeded} of {attempted} {what} succeeded (need {required})")]
    InsufficientSources {
        what: &'static str,
        attempted: usize,
        succeeded: usize,
        required: usize,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl StageError {
    pub fn malformed(what: &'static str, detail: impl std::fmt::Display) -> Self {
        Self::Malformed {
            what,
            detail: detail.to_string(),
        }
    }
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        StageError::Collaborator(format!("{:#}", err))
    }
}

/// A non-essential fan-out sub-task that failed. Swallowed at the stage
/// boundary and reported as a warning log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialSourceFailure {
    pub source: String,
    pub message: String,
}

impl std::fmt::Display for PartialSourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.source, self.message)
    }
}
