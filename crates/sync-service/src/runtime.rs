//! Lifecycle of the synchronization core inside the service.

use std::sync::Arc;
use std::time::Duration;

use saga::{
    CoordinatorConfig, Dispatcher, InMemoryGameplayService, InMemoryInventoryService,
    InMemoryUserService, SagaCoordinator,
};
use state_store::{ConflictStore, EventPublisher, ResolvedStateCache, SagaStore, StateStore};
use sync_core::SyncManager;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::routes::health::{HealthProbe, HealthState};

/// Saga coordinator wired to the in-process collaborator services.
pub type ServiceCoordinator<S, P> = SagaCoordinator<
    S,
    P,
    InMemoryUserService,
    InMemoryInventoryService,
    InMemoryGameplayService,
>;

/// Owns the sync manager, the saga coordinator, and the background purge of
/// expired resolved states.
pub struct SyncRuntime<S, P>
where
    S: StateStore + ConflictStore + ResolvedStateCache + SagaStore + Clone + 'static,
    P: EventPublisher + Clone + 'static,
{
    sync: Arc<SyncManager<S, P>>,
    sagas: Arc<ServiceCoordinator<S, P>>,
    store: S,
    purge_interval: Duration,
    purge: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl<S, P> SyncRuntime<S, P>
where
    S: StateStore + ConflictStore + ResolvedStateCache + SagaStore + Clone + 'static,
    P: EventPublisher + Clone + 'static,
{
    pub fn new(store: S, publisher: P, config: &Config) -> Self {
        let sync = SyncManager::new(store.clone(), publisher.clone());
        let sagas = SagaCoordinator::with_config(
            store.clone(),
            publisher,
            Dispatcher::new(
                InMemoryUserService::new(),
                InMemoryInventoryService::new(),
                InMemoryGameplayService::new(),
            ),
            CoordinatorConfig {
                retry_backoff: config.saga_retry_backoff,
            },
        );

        Self {
            sync: Arc::new(sync),
            sagas: Arc::new(sagas),
            store,
            purge_interval: config.resolved_purge_interval,
            purge: Mutex::new(None),
        }
    }

    pub fn sync_manager(&self) -> &Arc<SyncManager<S, P>> {
        &self.sync
    }

    pub fn coordinator(&self) -> &Arc<ServiceCoordinator<S, P>> {
        &self.sagas
    }

    pub async fn start(&self) {
        self.sync.start();
        self.sagas.start();

        let mut purge = self.purge.lock().await;
        if purge.is_none() {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(purge_expired(
                self.store.clone(),
                self.purge_interval,
                shutdown_rx,
            ));
            *purge = Some((shutdown_tx, handle));
        }

        tracing::info!("synchronization core started");
    }

    /// Drains running sagas, then stops the sync manager and the purge task.
    pub async fn stop(&self) {
        self.sagas.stop().await;
        self.sync.stop();

        if let Some((shutdown_tx, handle)) = self.purge.lock().await.take() {
            let _ = shutdown_tx.send(true);
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "purge task ended abnormally");
            }
        }

        tracing::info!("synchronization core stopped");
    }

    /// Health endpoint state reporting both core components.
    pub fn health_state(&self, backend: &'static str) -> HealthState {
        let sync = Arc::clone(&self.sync);
        let sagas = Arc::clone(&self.sagas);
        HealthState {
            backend,
            probes: vec![
                HealthProbe::new("sync_manager", move || sync.is_running()),
                HealthProbe::new("saga_coordinator", move || sagas.is_running()),
            ],
        }
    }
}

async fn purge_expired<S: ResolvedStateCache>(
    store: S,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => {
                    metrics::counter!("sync_resolved_states_purged_total").increment(purged);
                    tracing::debug!(purged, "purged expired resolved states");
                }
                Err(e) => tracing::warn!(error = %e, "failed to purge expired resolved states"),
            },
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga::{SagaStatus, SagaStep};
    use serde_json::json;
    use state_store::{InMemoryPublisher, InMemorySyncStore};

    fn runtime() -> SyncRuntime<InMemorySyncStore, InMemoryPublisher> {
        let config = Config {
            saga_retry_backoff: Duration::from_millis(5),
            resolved_purge_interval: Duration::from_millis(10),
            ..Config::default()
        };
        SyncRuntime::new(InMemorySyncStore::new(), InMemoryPublisher::new(), &config)
    }

    #[tokio::test]
    async fn test_start_and_stop_toggle_components() {
        let runtime = runtime();
        assert!(!runtime.sync_manager().is_running());
        assert!(!runtime.coordinator().is_running());

        runtime.start().await;
        assert!(runtime.sync_manager().is_running());
        assert!(runtime.coordinator().is_running());

        runtime.stop().await;
        assert!(!runtime.sync_manager().is_running());
        assert!(!runtime.coordinator().is_running());
    }

    #[tokio::test]
    async fn test_restart_respawns_purge_task() {
        let runtime = runtime();
        runtime.start().await;
        runtime.stop().await;
        assert!(runtime.purge.lock().await.is_none());

        runtime.start().await;
        assert!(runtime.purge.lock().await.is_some());
        runtime.stop().await;
    }

    #[tokio::test]
    async fn test_coordinator_runs_sagas_against_wired_services() {
        let runtime = runtime();
        runtime.start().await;

        let saga = runtime
            .coordinator()
            .start_saga(
                "create_player",
                vec![SagaStep::new(
                    "user-service",
                    "create_user",
                    json!({"user_id": "u1", "username": "alice"}),
                )],
            )
            .await
            .unwrap();

        let mut status = SagaStatus::Pending;
        for _ in 0..200 {
            status = runtime
                .coordinator()
                .get_saga_status(&saga.id)
                .await
                .unwrap()
                .status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, SagaStatus::Completed);

        runtime.stop().await;
    }

    #[tokio::test]
    async fn test_health_state_names_components() {
        let runtime = runtime();
        let health = runtime.health_state("memory");
        assert_eq!(health.backend, "memory");
        assert_eq!(health.probes.len(), 2);
    }
}
