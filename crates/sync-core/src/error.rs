//! Sync error types.

use common::ConflictId;
use state_store::StoreError;
use thiserror::Error;

/// Errors that can occur during state synchronization and conflict handling.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error occurred in the backing store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// No conflict exists with the given id.
    #[error("Conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    /// The conflict was already resolved; resolutions apply once.
    #[error("Conflict already resolved: {0}")]
    AlreadyResolved(ConflictId),

    /// The conflict needs a human to pick a resolution.
    #[error("Manual resolution required for conflict {0}")]
    ManualResolutionRequired(ConflictId),

    /// The conflict carries no usable resolution strategy.
    #[error("Unknown resolution strategy for conflict {0}")]
    UnknownResolution(ConflictId),

    /// The resolution was recorded but the resolved state could not be written.
    #[error("Failed to apply resolved state for {cache_key}: {source}")]
    ApplyResolvedState {
        cache_key: String,
        #[source]
        source: StoreError,
    },

    /// A stored row could not be mapped back to the domain model.
    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    /// The sync manager has not been started (or was stopped).
    #[error("Sync manager is not running")]
    NotRunning,
}

/// Convenience type alias for sync results.
pub type Result<T> = std::result::Result<T, SyncError>;
