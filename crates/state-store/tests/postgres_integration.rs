//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p state-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use state_store::{
    ConflictId, ConflictRecord, ConflictStore, EventPublisher, ExecutionRecord,
    PostgresSyncStore, ResolvedStateCache, SagaId, SagaRecord, SagaStore, StateStore, StoreError,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!("../../../migrations/001_create_sync_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresSyncStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE conflicts, saga_executions, sagas, sync_states, resolved_states",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresSyncStore::new(pool)
}

fn conflict(priority: i32) -> ConflictRecord {
    ConflictRecord {
        id: ConflictId::new(),
        key: "player-42".to_string(),
        category: "user_inventory".to_string(),
        old_state: json!({"currency": 100, "items": ["sword"]}),
        new_state: json!({"currency": 100, "items": ["sword", "shield"]}),
        conflict_type: "concurrent_modification".to_string(),
        detected_at: Utc::now(),
        resolved_at: None,
        resolution: None,
        metadata: json!({"severity": "medium"}),
        priority,
    }
}

#[tokio::test]
async fn insert_and_read_conflict() {
    let store = get_test_store().await;
    let record = conflict(6);

    store.insert_conflict(record.clone()).await.unwrap();

    let stored = store.get_conflict(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.key, "player-42");
    assert_eq!(stored.new_state, record.new_state);
    assert_eq!(stored.priority, 6);
    assert!(stored.resolved_at.is_none());
}

#[tokio::test]
async fn pending_conflicts_are_priority_ordered() {
    let store = get_test_store().await;
    let low = conflict(5);
    let high = conflict(9);

    store.insert_conflict(low.clone()).await.unwrap();
    store.insert_conflict(high.clone()).await.unwrap();

    let pending = store.pending_conflicts(10).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, high.id);
    assert_eq!(pending[1].id, low.id);

    let limited = store.pending_conflicts(1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn resolution_is_single_shot() {
    let store = get_test_store().await;
    let record = conflict(7);
    store.insert_conflict(record.clone()).await.unwrap();

    store
        .mark_conflict_resolved(&record.id, "last_write_wins", Utc::now())
        .await
        .unwrap();

    let again = store
        .mark_conflict_resolved(&record.id, "keep_old", Utc::now())
        .await;
    assert!(matches!(again, Err(StoreError::ConflictAlreadyResolved(_))));

    let missing = store
        .mark_conflict_resolved(&ConflictId::new(), "keep_old", Utc::now())
        .await;
    assert!(matches!(missing, Err(StoreError::ConflictNotFound(_))));

    assert!(store.pending_conflicts(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn saga_and_execution_rows() {
    let store = get_test_store().await;
    let id = SagaId::new();
    let now = Utc::now();

    let saga = SagaRecord {
        id: id.clone(),
        saga_type: "player_transfer".to_string(),
        status: "pending".to_string(),
        steps: json!([{"service": "user-service", "operation": "update_user"}]),
        current_step: -1,
        created_at: now,
        updated_at: now,
    };
    let execution = ExecutionRecord {
        saga_id: id.clone(),
        status: "pending".to_string(),
        current_step: -1,
        step_results: json!({}),
        compensation_results: json!([]),
        metadata: json!({"type": "player_transfer"}),
        created_at: now,
        updated_at: now,
    };

    store.insert_saga(saga, execution.clone()).await.unwrap();
    store
        .update_saga(&id, "completed", 0, Utc::now())
        .await
        .unwrap();
    store
        .update_execution(ExecutionRecord {
            status: "completed".to_string(),
            current_step: 0,
            step_results: json!({"0": {"status": "succeeded"}}),
            ..execution
        })
        .await
        .unwrap();

    let saga = store.get_saga(&id).await.unwrap().unwrap();
    assert_eq!(saga.status, "completed");
    let stored = store.get_execution(&id).await.unwrap().unwrap();
    assert_eq!(stored.current_step, 0);
    assert_eq!(stored.step_results["0"]["status"], "succeeded");

    assert!(store.get_execution(&SagaId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn state_versions_increment() {
    let store = get_test_store().await;

    let v1 = store
        .put_state("player-1", "game_state", json!({"level": 3}))
        .await
        .unwrap();
    let v2 = store
        .put_state("player-1", "game_state", json!({"level": 4}))
        .await
        .unwrap();

    assert_eq!(v1.version, 1);
    assert_eq!(v2.version, 2);

    let current = store
        .get_state("player-1", "game_state")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.value, json!({"level": 4}));
}

#[tokio::test]
async fn resolved_state_cache_ttl() {
    let store = get_test_store().await;

    store
        .set_resolved("sync:resolved:game_state:p1", json!({"level": 5}), Duration::from_secs(3600))
        .await
        .unwrap();
    store
        .set_resolved("sync:resolved:game_state:p2", json!({"level": 1}), Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(
        store
            .get_resolved("sync:resolved:game_state:p1")
            .await
            .unwrap(),
        Some(json!({"level": 5}))
    );
    assert!(
        store
            .get_resolved("sync:resolved:game_state:p2")
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(store.purge_expired().await.unwrap(), 1);
}

#[tokio::test]
async fn publish_via_pg_notify() {
    let store = get_test_store().await;
    let info = get_container_info().await;

    let mut listener = sqlx::postgres::PgListener::connect(&info.connection_string)
        .await
        .unwrap();
    listener.listen("saga-events").await.unwrap();

    store
        .publish("saga-events", json!({"type": "saga_completed"}))
        .await
        .unwrap();

    let notification = tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .unwrap()
        .unwrap();
    let payload: serde_json::Value = serde_json::from_str(notification.payload()).unwrap();
    assert_eq!(payload["type"], "saga_completed");
}
