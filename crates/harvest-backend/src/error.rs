//! Error types for backend calls and workflows.

use thiserror::Error;

use crate::workflow::WorkflowKind;

/// Errors from a single backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network or protocol failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend rejected the credentials.
    #[error("not logged in")]
    Unauthorized,

    /// The backend answered with a 5xx status.
    #[error("backend server error (status {0})")]
    Server(u16),

    /// The backend answered with an unexpected status.
    #[error("unexpected backend status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("invalid backend response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Returns true for failures worth retrying on the next poll tick.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http(e) => !e.is_decode() && !e.is_builder(),
            BackendError::Server(_) => true,
            _ => false,
        }
    }
}

/// Errors that end a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Another workflow of the same kind is still running.
    #[error("{0} workflow is already running")]
    AlreadyRunning(WorkflowKind),

    /// There is nothing to upload.
    #[error("no entries to send")]
    NoEntries,

    /// The backend rejected the credentials.
    #[error("not logged in")]
    Unauthorized,

    /// The backend reported the job as failed.
    #[error("backend job failed: {0}")]
    Failed(String),

    /// The job was still in progress after the last allowed poll.
    #[error("timed out after {attempts} status checks")]
    TimedOut { attempts: u32 },

    /// The workflow was cancelled.
    #[error("workflow cancelled")]
    Cancelled,

    /// A non-retryable backend call failed.
    #[error(transparent)]
    Backend(BackendError),

    /// The HAR payload could not be serialized.
    #[error("failed to serialize HAR: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<BackendError> for WorkflowError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized => WorkflowError::Unauthorized,
            other => WorkflowError::Backend(other),
        }
    }
}

/// Result type for backend calls.
pub type Result<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_workflow_unauthorized() {
        assert!(matches!(
            WorkflowError::from(BackendError::Unauthorized),
            WorkflowError::Unauthorized
        ));
        assert!(matches!(
            WorkflowError::from(BackendError::Server(503)),
            WorkflowError::Backend(BackendError::Server(503))
        ));
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(BackendError::Server(500).is_transient());
        assert!(!BackendError::Unauthorized.is_transient());
        assert!(!BackendError::Decode("x".into()).is_transient());
    }

    #[test]
    fn timeout_is_distinct_from_failure() {
        let timeout = WorkflowError::TimedOut { attempts: 20 };
        assert_eq!(timeout.to_string(), "timed out after 20 status checks");
        assert_ne!(timeout.to_string(), WorkflowError::Failed("boom".into()).to_string());
    }
}
