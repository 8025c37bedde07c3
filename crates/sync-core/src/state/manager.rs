//! Versioned (key, category) state accessor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use state_store::{StateRecord, StateStore};

use super::{Category, StatePayload};
use crate::error::Result;

/// The current value for one (key, category).
///
/// `version` increments on every accepted update. It is advisory: writes
/// are not rejected for being based on an older version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub key: String,
    pub category: Category,
    pub value: StatePayload,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<StateRecord> for SyncState {
    fn from(record: StateRecord) -> Self {
        Self {
            key: record.key,
            category: Category::from(record.category),
            value: StatePayload::from(record.value),
            version: record.version,
            updated_at: record.updated_at,
        }
    }
}

/// Thin accessor over a [`StateStore`].
#[derive(Clone)]
pub struct StateManager<S: StateStore> {
    store: S,
}

impl<S: StateStore> StateManager<S> {
    /// Creates a new state manager over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reads the current state, if any.
    #[tracing::instrument(skip(self), fields(category = %category))]
    pub async fn get_state(&self, key: &str, category: &Category) -> Result<Option<SyncState>> {
        let record = self.store.get_state(key, category.as_str()).await?;
        Ok(record.map(SyncState::from))
    }

    /// Writes a new value and returns the stored state with its new version.
    #[tracing::instrument(skip(self, value), fields(category = %category))]
    pub async fn update_state(
        &self,
        key: &str,
        category: &Category,
        value: StatePayload,
    ) -> Result<SyncState> {
        let record = self
            .store
            .put_state(key, category.as_str(), value.to_json())
            .await?;
        tracing::debug!(version = record.version, "state updated");
        Ok(SyncState::from(record))
    }
}
