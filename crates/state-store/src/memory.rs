use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    ConflictId, ConflictRecord, ExecutionRecord, Result, SagaId, SagaRecord, StateRecord,
    StoreError,
    store::{ConflictStore, ResolvedStateCache, SagaStore, StateStore, expires_at},
};

#[derive(Debug, Clone)]
struct CachedValue {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// In-memory synchronization store for testing and single-node deployments.
///
/// Provides the same interface as the PostgreSQL implementation. Clones share
/// the same underlying data.
#[derive(Clone, Default)]
pub struct InMemorySyncStore {
    conflicts: Arc<RwLock<HashMap<ConflictId, ConflictRecord>>>,
    sagas: Arc<RwLock<HashMap<SagaId, SagaRecord>>>,
    executions: Arc<RwLock<HashMap<SagaId, ExecutionRecord>>>,
    states: Arc<RwLock<HashMap<(String, String), StateRecord>>>,
    resolved: Arc<RwLock<HashMap<String, CachedValue>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemorySyncStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with `StoreError::Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns the total number of conflicts stored, resolved or not.
    pub async fn conflict_count(&self) -> usize {
        self.conflicts.read().await.len()
    }

    /// Returns the number of saga rows stored.
    pub async fn saga_count(&self) -> usize {
        self.sagas.read().await.len()
    }

    /// Clears all data.
    pub async fn clear(&self) {
        self.conflicts.write().await.clear();
        self.sagas.write().await.clear();
        self.executions.write().await.clear();
        self.states.write().await.clear();
        self.resolved.write().await.clear();
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "writes are disabled on this store".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ConflictStore for InMemorySyncStore {
    async fn insert_conflict(&self, record: ConflictRecord) -> Result<()> {
        self.check_writable()?;
        self.conflicts
            .write()
            .await
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn mark_conflict_resolved(
        &self,
        id: &ConflictId,
        resolution: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        let mut conflicts = self.conflicts.write().await;
        let record = conflicts
            .get_mut(id)
            .ok_or_else(|| StoreError::ConflictNotFound(id.clone()))?;

        if record.is_resolved() {
            return Err(StoreError::ConflictAlreadyResolved(id.clone()));
        }

        record.resolution = Some(resolution.to_string());
        record.resolved_at = Some(resolved_at);
        Ok(())
    }

    async fn get_conflict(&self, id: &ConflictId) -> Result<Option<ConflictRecord>> {
        Ok(self.conflicts.read().await.get(id).cloned())
    }

    async fn pending_conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        let conflicts = self.conflicts.read().await;
        let mut pending: Vec<_> = conflicts
            .values()
            .filter(|c| !c.is_resolved())
            .cloned()
            .collect();

        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.detected_at.cmp(&b.detected_at))
                .then(a.id.cmp(&b.id))
        });
        pending.truncate(limit);
        Ok(pending)
    }
}

#[async_trait]
impl SagaStore for InMemorySyncStore {
    async fn insert_saga(&self, saga: SagaRecord, execution: ExecutionRecord) -> Result<()> {
        self.check_writable()?;
        self.sagas.write().await.insert(saga.id.clone(), saga);
        self.executions
            .write()
            .await
            .insert(execution.saga_id.clone(), execution);
        Ok(())
    }

    async fn update_saga(
        &self,
        id: &SagaId,
        status: &str,
        current_step: i32,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        let mut sagas = self.sagas.write().await;
        let saga = sagas
            .get_mut(id)
            .ok_or_else(|| StoreError::SagaNotFound(id.clone()))?;
        saga.status = status.to_string();
        saga.current_step = current_step;
        saga.updated_at = updated_at;
        Ok(())
    }

    async fn update_execution(&self, execution: ExecutionRecord) -> Result<()> {
        self.check_writable()?;
        let mut executions = self.executions.write().await;
        let existing = executions
            .get_mut(&execution.saga_id)
            .ok_or_else(|| StoreError::SagaNotFound(execution.saga_id.clone()))?;
        // created_at is fixed at insert time.
        let created_at = existing.created_at;
        *existing = ExecutionRecord {
            created_at,
            ..execution
        };
        Ok(())
    }

    async fn get_saga(&self, id: &SagaId) -> Result<Option<SagaRecord>> {
        Ok(self.sagas.read().await.get(id).cloned())
    }

    async fn get_execution(&self, id: &SagaId) -> Result<Option<ExecutionRecord>> {
        Ok(self.executions.read().await.get(id).cloned())
    }
}

#[async_trait]
impl StateStore for InMemorySyncStore {
    async fn get_state(&self, key: &str, category: &str) -> Result<Option<StateRecord>> {
        let states = self.states.read().await;
        Ok(states
            .get(&(key.to_string(), category.to_string()))
            .cloned())
    }

    async fn put_state(&self, key: &str, category: &str, value: Value) -> Result<StateRecord> {
        self.check_writable()?;
        let mut states = self.states.write().await;
        let now = Utc::now();
        let record = states
            .entry((key.to_string(), category.to_string()))
            .and_modify(|r| {
                r.version += 1;
                r.value = value.clone();
                r.updated_at = now;
            })
            .or_insert_with(|| StateRecord {
                key: key.to_string(),
                category: category.to_string(),
                value: value.clone(),
                version: 1,
                updated_at: now,
            });
        Ok(record.clone())
    }
}

#[async_trait]
impl ResolvedStateCache for InMemorySyncStore {
    async fn set_resolved(&self, cache_key: &str, value: Value, ttl: Duration) -> Result<()> {
        self.check_writable()?;
        let expires_at = expires_at(ttl)?;
        self.resolved
            .write()
            .await
            .insert(cache_key.to_string(), CachedValue { value, expires_at });
        Ok(())
    }

    async fn get_resolved(&self, cache_key: &str) -> Result<Option<Value>> {
        let resolved = self.resolved.read().await;
        Ok(resolved
            .get(cache_key)
            .filter(|c| c.expires_at > Utc::now())
            .map(|c| c.value.clone()))
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut resolved = self.resolved.write().await;
        let now = Utc::now();
        let before = resolved.len();
        resolved.retain(|_, c| c.expires_at > now);
        Ok((before - resolved.len()) as u64)
    }
}
