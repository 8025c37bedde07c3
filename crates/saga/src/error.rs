//! Saga error types.

use common::SagaId;
use state_store::StoreError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The submitted saga or one of its steps is invalid.
    #[error("Invalid saga: {0}")]
    Validation(String),

    /// No saga exists with the given id, or it is no longer running.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// The coordinator is stopped and does not accept new sagas.
    #[error("Saga coordinator is not running")]
    NotRunning,

    /// The step names a service outside the dispatch table.
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// The step names an operation the service does not offer.
    #[error("Unknown {service} operation: {operation}")]
    UnknownOperation { service: String, operation: String },

    /// The step payload is missing a field or has the wrong shape.
    #[error("Invalid payload for {service}: {reason}")]
    InvalidPayload { service: String, reason: String },

    /// The service refused the operation on business grounds.
    #[error("{service} rejected the operation: {reason}")]
    Rejected { service: String, reason: String },

    /// The service failed in a way that may succeed on retry.
    #[error("{service} error: {reason}")]
    Service { service: String, reason: String },

    /// The step did not finish within its timeout.
    #[error("Step timed out after {seconds}s")]
    StepTimeout { seconds: u64 },

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back to the saga model.
    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),
}

impl SagaError {
    /// Returns true for step failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SagaError::Service { .. } | SagaError::StepTimeout { .. }
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
