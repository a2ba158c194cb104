//! Error taxonomy shared by every component of the workflow engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The coarse category of a [`WorkflowError`], for callers that want to
/// match on kind without matching the full payload-bearing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    Cycle,
    UnknownDependency,
    UnmetDependencies,
    MissingDependency,
    Timeout,
    StepExecution,
    Cancelled,
    NotFound,
    AlreadyComplete,
    WorkflowFailed,
}

/// Errors produced by DAG validation, step execution, and workflow resume.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("circular dependency detected involving step '{step}'")]
    Cycle { step: String },

    #[error("step '{step}' depends on '{dependency}' which does not exist")]
    UnknownDependency { step: String, dependency: String },

    #[error("cannot execute remaining steps due to unmet dependencies: {}", remaining.join(", "))]
    UnmetDependencies { remaining: Vec<String> },

    #[error("step '{step}' requires output of '{dependency}' which is not available")]
    MissingDependency { step: String, dependency: String },

    #[error("step '{step}' timed out after {timeout_secs}s")]
    Timeout { step: String, timeout_secs: u64 },

    #[error("step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },

    #[error("step '{step}' was cancelled")]
    Cancelled { step: String },

    #[error("workflow '{workflow_id}' not found")]
    NotFound { workflow_id: String },

    #[error("workflow '{workflow_id}' already completed")]
    AlreadyComplete { workflow_id: String },

    #[error("workflow failed, failed steps: {}", failed_steps.join(", "))]
    WorkflowFailed { failed_steps: Vec<String> },
}

impl WorkflowError {
    /// Coarse category of this error, useful for callers that branch on
    /// kind rather than matching the full enum.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Cycle { .. } => ErrorKind::Cycle,
            WorkflowError::UnknownDependency { .. } => ErrorKind::UnknownDependency,
            WorkflowError::UnmetDependencies { .. } => ErrorKind::UnmetDependencies,
            WorkflowError::MissingDependency { .. } => ErrorKind::MissingDependency,
            WorkflowError::Timeout { .. } => ErrorKind::Timeout,
            WorkflowError::StepExecution { .. } => ErrorKind::StepExecution,
            WorkflowError::Cancelled { .. } => ErrorKind::Cancelled,
            WorkflowError::NotFound { .. } => ErrorKind::NotFound,
            WorkflowError::AlreadyComplete { .. } => ErrorKind::AlreadyComplete,
            WorkflowError::WorkflowFailed { .. } => ErrorKind::WorkflowFailed,
        }
    }

    /// Whether this error, by its structured kind alone (no message
    /// inspection), should always be retried up to the attempt cap.
    pub fn always_retryable(&self) -> bool {
        matches!(self, WorkflowError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// A serializable snapshot of a [`WorkflowError`], suitable for embedding
/// in a persisted [`crate::StepResult`] (the source error itself is not
/// required to round-trip through a state store, only its kind and text).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&WorkflowError> for StepErrorInfo {
    fn from(err: &WorkflowError) -> Self {
        StepErrorInfo {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<WorkflowError> for StepErrorInfo {
    fn from(err: WorkflowError) -> Self {
        StepErrorInfo::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_names_the_step() {
        let err = WorkflowError::Cycle {
            step: "b".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Cycle);
        assert!(err.to_string().contains('b'));
    }

    #[test]
    fn unmet_dependencies_lists_remaining() {
        let err = WorkflowError::UnmetDependencies {
            remaining: vec!["x".to_string(), "y".to_string()],
        };
        assert!(err.to_string().contains("x, y"));
    }

    #[test]
    fn timeout_is_always_retryable() {
        let err = WorkflowError::Timeout {
            step: "s".to_string(),
            timeout_secs: 1,
        };
        assert!(err.always_retryable());

        let err = WorkflowError::StepExecution {
            step: "s".to_string(),
            message: "temporary".to_string(),
        };
        assert!(!err.always_retryable());
    }
}
