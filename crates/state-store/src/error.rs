use thiserror::Error;

use crate::{ConflictId, SagaId};

/// Errors that can occur when interacting with the synchronization store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No conflict row exists with the given id.
    #[error("Conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    /// The conflict already carries a resolution; resolutions are written once.
    #[error("Conflict already resolved: {0}")]
    ConflictAlreadyResolved(ConflictId),

    /// No saga row exists with the given id.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// A cache TTL reaches past the representable time range.
    #[error("Invalid TTL: {0:?}")]
    InvalidTtl(std::time::Duration),

    /// The backing store refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
