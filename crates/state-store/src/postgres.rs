use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    ConflictId, ConflictRecord, ExecutionRecord, Result, SagaId, SagaRecord, StateRecord,
    StoreError,
    publish::EventPublisher,
    store::{ConflictStore, ResolvedStateCache, SagaStore, StateStore, expires_at},
};

const CONFLICT_COLUMNS: &str = "id, key, category, old_state, new_state, conflict_type, \
     detected_at, resolved_at, resolution, metadata, priority";

/// PostgreSQL-backed synchronization store.
///
/// Also publishes events through `pg_notify`, so listeners on the
/// `conflict-events` / `saga-events` channels receive the JSON envelopes.
#[derive(Clone)]
pub struct PostgresSyncStore {
    pool: PgPool,
}

impl PostgresSyncStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    fn row_to_conflict(row: PgRow) -> Result<ConflictRecord> {
        Ok(ConflictRecord {
            id: ConflictId::from_string(row.try_get::<String, _>("id")?),
            key: row.try_get("key")?,
            category: row.try_get("category")?,
            old_state: row.try_get("old_state")?,
            new_state: row.try_get("new_state")?,
            conflict_type: row.try_get("conflict_type")?,
            detected_at: row.try_get("detected_at")?,
            resolved_at: row.try_get("resolved_at")?,
            resolution: row.try_get("resolution")?,
            metadata: row.try_get("metadata")?,
            priority: row.try_get("priority")?,
        })
    }

    fn row_to_saga(row: PgRow) -> Result<SagaRecord> {
        Ok(SagaRecord {
            id: SagaId::from_string(row.try_get::<String, _>("id")?),
            saga_type: row.try_get("saga_type")?,
            status: row.try_get("status")?,
            steps: row.try_get("steps")?,
            current_step: row.try_get("current_step")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_execution(row: PgRow) -> Result<ExecutionRecord> {
        Ok(ExecutionRecord {
            saga_id: SagaId::from_string(row.try_get::<String, _>("saga_id")?),
            status: row.try_get("status")?,
            current_step: row.try_get("current_step")?,
            step_results: row.try_get("step_results")?,
            compensation_results: row.try_get("compensation_results")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_state(row: PgRow) -> Result<StateRecord> {
        Ok(StateRecord {
            key: row.try_get("key")?,
            category: row.try_get("category")?,
            value: row.try_get("value")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ConflictStore for PostgresSyncStore {
    async fn insert_conflict(&self, record: ConflictRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conflicts (id, key, category, old_state, new_state, conflict_type,
                                   detected_at, resolved_at, resolution, metadata, priority)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id.as_str())
        .bind(&record.key)
        .bind(&record.category)
        .bind(&record.old_state)
        .bind(&record.new_state)
        .bind(&record.conflict_type)
        .bind(record.detected_at)
        .bind(record.resolved_at)
        .bind(&record.resolution)
        .bind(&record.metadata)
        .bind(record.priority)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_conflict_resolved(
        &self,
        id: &ConflictId,
        resolution: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE conflicts
            SET resolution = $1, resolved_at = $2
            WHERE id = $3 AND resolved_at IS NULL
            "#,
        )
        .bind(resolution)
        .bind(resolved_at)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return match self.get_conflict(id).await? {
                Some(_) => Err(StoreError::ConflictAlreadyResolved(id.clone())),
                None => Err(StoreError::ConflictNotFound(id.clone())),
            };
        }

        Ok(())
    }

    async fn get_conflict(&self, id: &ConflictId) -> Result<Option<ConflictRecord>> {
        let sql = format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_conflict).transpose()
    }

    async fn pending_conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM conflicts \
             WHERE resolved_at IS NULL \
             ORDER BY priority DESC, detected_at ASC, id ASC \
             LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_conflict).collect()
    }
}

#[async_trait]
impl SagaStore for PostgresSyncStore {
    async fn insert_saga(&self, saga: SagaRecord, execution: ExecutionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sagas (id, saga_type, status, steps, current_step, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(saga.id.as_str())
        .bind(&saga.saga_type)
        .bind(&saga.status)
        .bind(&saga.steps)
        .bind(saga.current_step)
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO saga_executions (saga_id, status, current_step, step_results,
                                         compensation_results, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(execution.saga_id.as_str())
        .bind(&execution.status)
        .bind(execution.current_step)
        .bind(&execution.step_results)
        .bind(&execution.compensation_results)
        .bind(&execution.metadata)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_saga(
        &self,
        id: &SagaId,
        status: &str,
        current_step: i32,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE sagas SET status = $1, current_step = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(status)
        .bind(current_step)
        .bind(updated_at)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::SagaNotFound(id.clone()));
        }
        Ok(())
    }

    async fn update_execution(&self, execution: ExecutionRecord) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE saga_executions
            SET status = $1, current_step = $2, step_results = $3,
                compensation_results = $4, metadata = $5, updated_at = $6
            WHERE saga_id = $7
            "#,
        )
        .bind(&execution.status)
        .bind(execution.current_step)
        .bind(&execution.step_results)
        .bind(&execution.compensation_results)
        .bind(&execution.metadata)
        .bind(execution.updated_at)
        .bind(execution.saga_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::SagaNotFound(execution.saga_id));
        }
        Ok(())
    }

    async fn get_saga(&self, id: &SagaId) -> Result<Option<SagaRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, saga_type, status, steps, current_step, created_at, updated_at
            FROM sagas
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_saga).transpose()
    }

    async fn get_execution(&self, id: &SagaId) -> Result<Option<ExecutionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT saga_id, status, current_step, step_results, compensation_results,
                   metadata, created_at, updated_at
            FROM saga_executions
            WHERE saga_id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_execution).transpose()
    }
}

#[async_trait]
impl StateStore for PostgresSyncStore {
    async fn get_state(&self, key: &str, category: &str) -> Result<Option<StateRecord>> {
        let row = sqlx::query(
            r#"
            SELECT key, category, value, version, updated_at
            FROM sync_states
            WHERE key = $1 AND category = $2
            "#,
        )
        .bind(key)
        .bind(category)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_state).transpose()
    }

    async fn put_state(&self, key: &str, category: &str, value: Value) -> Result<StateRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO sync_states (key, category, value, version, updated_at)
            VALUES ($1, $2, $3, 1, $4)
            ON CONFLICT (key, category) DO UPDATE
            SET value = EXCLUDED.value,
                version = sync_states.version + 1,
                updated_at = EXCLUDED.updated_at
            RETURNING key, category, value, version, updated_at
            "#,
        )
        .bind(key)
        .bind(category)
        .bind(&value)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_state(row)
    }
}

#[async_trait]
impl ResolvedStateCache for PostgresSyncStore {
    async fn set_resolved(&self, cache_key: &str, value: Value, ttl: Duration) -> Result<()> {
        let expires_at = expires_at(ttl)?;

        sqlx::query(
            r#"
            INSERT INTO resolved_states (cache_key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (cache_key) DO UPDATE
            SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(cache_key)
        .bind(&value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_resolved(&self, cache_key: &str) -> Result<Option<Value>> {
        let value: Option<Value> = sqlx::query_scalar(
            "SELECT value FROM resolved_states WHERE cache_key = $1 AND expires_at > now()",
        )
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM resolved_states WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed)
    }
}

#[async_trait]
impl EventPublisher for PostgresSyncStore {
    #[tracing::instrument(skip(self, payload))]
    async fn publish(&self, channel: &str, payload: Value) -> Result<()> {
        let payload = serde_json::to_string(&payload)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        metrics::counter!("sync_events_published_total", "channel" => channel.to_string())
            .increment(1);
        Ok(())
    }
}
