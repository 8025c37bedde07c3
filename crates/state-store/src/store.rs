use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    ConflictId, ConflictRecord, ExecutionRecord, Result, SagaId, SagaRecord, StateRecord,
    StoreError,
};

/// Retention of resolved state in the keyed cache.
pub const RESOLVED_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Builds the cache key a resolved state is stored under.
pub fn resolved_state_key(category: &str, key: &str) -> String {
    format!("sync:resolved:{category}:{key}")
}

/// Absolute expiry of a cache entry written now with `ttl`.
pub fn expires_at(ttl: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .ok_or(StoreError::InvalidTtl(ttl))
}

/// Durable storage for conflicts.
///
/// Conflicts are never deleted; a resolved conflict is an audit record.
#[async_trait]
pub trait ConflictStore: Send + Sync {
    /// Inserts a new, unresolved conflict.
    async fn insert_conflict(&self, record: ConflictRecord) -> Result<()>;

    /// Records the resolution of a conflict.
    ///
    /// Fails with `ConflictAlreadyResolved` if a resolution was already
    /// written, and `ConflictNotFound` if the id is unknown.
    async fn mark_conflict_resolved(
        &self,
        id: &ConflictId,
        resolution: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Point read of a conflict.
    async fn get_conflict(&self, id: &ConflictId) -> Result<Option<ConflictRecord>>;

    /// Unresolved conflicts ordered by priority (highest first), then
    /// detection time (oldest first).
    async fn pending_conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>>;
}

/// Durable storage for sagas and their execution records.
///
/// Every method is an independent write; there is no multi-row atomicity.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts the saga row followed by its execution row.
    async fn insert_saga(&self, saga: SagaRecord, execution: ExecutionRecord) -> Result<()>;

    /// Updates the saga row's status and current step.
    async fn update_saga(
        &self,
        id: &SagaId,
        status: &str,
        current_step: i32,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Replaces the progress columns of an execution row.
    async fn update_execution(&self, execution: ExecutionRecord) -> Result<()>;

    /// Point read of a saga row.
    async fn get_saga(&self, id: &SagaId) -> Result<Option<SagaRecord>>;

    /// Point read of an execution row.
    async fn get_execution(&self, id: &SagaId) -> Result<Option<ExecutionRecord>>;
}

/// Versioned (key, category) state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the current state for a key in a category.
    async fn get_state(&self, key: &str, category: &str) -> Result<Option<StateRecord>>;

    /// Writes a value, incrementing the version (starting at 1).
    async fn put_state(&self, key: &str, category: &str, value: Value) -> Result<StateRecord>;
}

/// Short-lived keyed store that resolved conflict states are written to.
#[async_trait]
pub trait ResolvedStateCache: Send + Sync {
    /// Stores a value under `cache_key` for `ttl`.
    async fn set_resolved(&self, cache_key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Reads a value if present and not yet expired.
    async fn get_resolved(&self, cache_key: &str) -> Result<Option<Value>>;

    /// Drops expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_at_adds_ttl() {
        let before = Utc::now();
        let expiry = expires_at(RESOLVED_STATE_TTL).unwrap();
        assert!(expiry >= before + chrono::Duration::hours(24));
        assert!(expiry <= Utc::now() + chrono::Duration::hours(24));
    }

    #[test]
    fn test_expires_at_rejects_out_of_range_ttl() {
        // Past chrono's latest representable date.
        let far = Duration::from_secs(400_000 * 365 * 24 * 60 * 60);
        assert!(matches!(expires_at(far), Err(StoreError::InvalidTtl(_))));
        // Past chrono's largest duration.
        assert!(matches!(
            expires_at(Duration::from_secs(u64::MAX)),
            Err(StoreError::InvalidTtl(_))
        ));
    }
}
