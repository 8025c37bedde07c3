//! Saga coordinator: runs saga steps in order, one task per saga.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use common::{ActiveGauge, SagaId};
use serde_json::{Value, json};
use state_store::{EventPublisher, SAGA_EVENTS_CHANNEL, SagaStore};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinSet;

use crate::dispatch::Dispatcher;
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::execution::{Saga, SagaExecution, StepResult};
use crate::services::{GameplayService, InventoryService, UserService};
use crate::state::SagaStatus;
use crate::step::{SagaStep, prepare_steps};

/// Pause between retries of a failed step.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub retry_backoff: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Orchestrates sagas over the user, inventory, and gameplay services.
///
/// Each saga runs on its own tokio task. Steps run strictly in order, each
/// under its own timeout. When a step fails, the steps before it are
/// compensated in reverse order and the saga ends `failed`. Progress is
/// checkpointed to the store after every step.
pub struct SagaCoordinator<S, P, U, I, G>
where
    S: SagaStore + 'static,
    P: EventPublisher + 'static,
    U: UserService + 'static,
    I: InventoryService + 'static,
    G: GameplayService + 'static,
{
    inner: Arc<Inner<S, P, U, I, G>>,
}

struct Inner<S, P, U, I, G>
where
    S: SagaStore,
    P: EventPublisher,
    U: UserService,
    I: InventoryService,
    G: GameplayService,
{
    store: S,
    publisher: P,
    dispatcher: Dispatcher<U, I, G>,
    config: CoordinatorConfig,
    cancellations: RwLock<HashMap<SagaId, watch::Sender<bool>>>,
    tasks: Mutex<JoinSet<()>>,
    running: AtomicBool,
}

impl<S, P, U, I, G> SagaCoordinator<S, P, U, I, G>
where
    S: SagaStore + 'static,
    P: EventPublisher + 'static,
    U: UserService + 'static,
    I: InventoryService + 'static,
    G: GameplayService + 'static,
{
    /// Creates a stopped coordinator with default configuration.
    pub fn new(store: S, publisher: P, users: U, inventory: I, gameplay: G) -> Self {
        Self::with_config(
            store,
            publisher,
            Dispatcher::new(users, inventory, gameplay),
            CoordinatorConfig::default(),
        )
    }

    /// Creates a stopped coordinator with explicit configuration.
    pub fn with_config(
        store: S,
        publisher: P,
        dispatcher: Dispatcher<U, I, G>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                publisher,
                dispatcher,
                config,
                cancellations: RwLock::new(HashMap::new()),
                tasks: Mutex::new(JoinSet::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Starts accepting sagas.
    pub fn start(&self) {
        if !self.inner.running.swap(true, Ordering::SeqCst) {
            tracing::info!("saga coordinator started");
        }
    }

    /// Stops accepting sagas, cancels the running ones, and waits for their
    /// tasks to finish compensating.
    pub async fn stop(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        self.inner.running.store(false, Ordering::SeqCst);

        for sender in self.inner.cancellations.read().await.values() {
            let _ = sender.send(true);
        }

        let in_flight = tasks.len();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "saga task ended abnormally");
            }
        }
        tracing::info!(in_flight, "saga coordinator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Number of sagas whose tasks have not finished.
    pub async fn active_sagas(&self) -> usize {
        self.inner.cancellations.read().await.len()
    }

    /// Validates and persists a saga, then starts executing it in the
    /// background.
    ///
    /// Returns the saga as persisted, with status `pending`. Invalid sagas
    /// are rejected before anything is persisted.
    #[tracing::instrument(skip(self, steps), fields(steps = steps.len()))]
    pub async fn start_saga(&self, saga_type: &str, steps: Vec<SagaStep>) -> Result<Saga> {
        let steps = prepare_steps(steps)?;

        let mut tasks = self.inner.tasks.lock().await;
        if !self.is_running() {
            return Err(SagaError::NotRunning);
        }

        let saga = Saga::new(saga_type.to_string(), steps);
        let execution = SagaExecution::for_saga(&saga);

        if let Err(e) = self
            .inner
            .store
            .insert_saga(saga.to_record()?, execution.to_record()?)
            .await
        {
            tracing::error!(error = %e, "failed to persist saga");
            return Err(e.into());
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.inner
            .cancellations
            .write()
            .await
            .insert(saga.id.clone(), cancel_tx);

        while tasks.try_join_next().is_some() {}
        let inner = Arc::clone(&self.inner);
        tasks.spawn(inner.execute(saga.clone(), execution, cancel_rx));

        metrics::counter!("saga_executions_total", "saga_type" => saga.saga_type.clone())
            .increment(1);
        tracing::info!(saga_id = %saga.id, "saga started");

        Ok(saga)
    }

    /// Reads the persisted execution of a saga.
    pub async fn get_saga_status(&self, saga_id: &SagaId) -> Result<SagaExecution> {
        let record = self
            .inner
            .store
            .get_execution(saga_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(saga_id.clone()))?;
        SagaExecution::try_from(record)
    }

    /// Reads the persisted saga definition and status.
    pub async fn get_saga(&self, saga_id: &SagaId) -> Result<Saga> {
        let record = self
            .inner
            .store
            .get_saga(saga_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(saga_id.clone()))?;
        Saga::try_from(record)
    }

    /// Asks a running saga to stop before its next step.
    ///
    /// The saga compensates the steps it completed and ends `failed` with
    /// `cancelled = true` in its execution metadata. A step already in
    /// flight is not interrupted.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_saga(&self, saga_id: &SagaId) -> Result<()> {
        let cancellations = self.inner.cancellations.read().await;
        let sender = cancellations
            .get(saga_id)
            .ok_or_else(|| SagaError::NotFound(saga_id.clone()))?;
        sender
            .send(true)
            .map_err(|_| SagaError::NotFound(saga_id.clone()))?;

        tracing::info!("saga cancellation requested");
        Ok(())
    }
}

impl<S, P, U, I, G> Inner<S, P, U, I, G>
where
    S: SagaStore,
    P: EventPublisher,
    U: UserService,
    I: InventoryService,
    G: GameplayService,
{
    #[tracing::instrument(skip_all, fields(saga_id = %saga.id, saga_type = %saga.saga_type))]
    async fn execute(
        self: Arc<Self>,
        mut saga: Saga,
        mut execution: SagaExecution,
        cancel: watch::Receiver<bool>,
    ) {
        let saga_start = Instant::now();
        let _active = ActiveGauge::enter("saga_active");

        set_status(&mut saga, &mut execution, SagaStatus::Running);
        self.checkpoint(&saga, &execution).await;

        let steps = saga.steps.clone();
        let mut stopped_at = None;
        let mut failed_step = None;
        let mut cancelled = false;

        for (index, step) in steps.iter().enumerate() {
            if is_cancelled(&cancel) {
                cancelled = true;
                stopped_at = Some(index);
                break;
            }

            saga.current_step = index as i32;
            execution.current_step = saga.current_step;
            tracing::info!(
                step = index,
                service = %step.service,
                operation = %step.operation,
                "saga step started"
            );

            let result = self.run_step(index, step, &cancel).await;
            let failed = !result.succeeded();
            execution.step_results.insert(index, result);
            touch(&mut saga, &mut execution);
            self.checkpoint(&saga, &execution).await;

            if failed {
                cancelled = is_cancelled(&cancel);
                failed_step = Some(index);
                stopped_at = Some(index);
                break;
            }
        }

        match stopped_at {
            Some(index) => {
                self.compensate(&saga, &steps[..index], &mut execution).await;
                if let Some(failed) = failed_step {
                    execution.metadata.insert("failed_step".to_string(), json!(failed));
                }
                if cancelled {
                    execution.metadata.insert("cancelled".to_string(), json!(true));
                }
                set_status(&mut saga, &mut execution, SagaStatus::Failed);
            }
            None => set_status(&mut saga, &mut execution, SagaStatus::Completed),
        }

        self.checkpoint(&saga, &execution).await;
        self.cancellations.write().await.remove(&saga.id);
        self.publish_completion(&saga, &execution).await;

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        match saga.status {
            SagaStatus::Completed => {
                metrics::counter!("saga_completed").increment(1);
                tracing::info!(duration, "saga completed successfully");
            }
            _ => {
                metrics::counter!("saga_failed").increment(1);
                tracing::warn!(duration, cancelled, failed_step = ?failed_step, "saga failed");
            }
        }
    }

    /// Runs one step, retrying transient failures within its retry budget.
    async fn run_step(
        &self,
        index: usize,
        step: &SagaStep,
        cancel: &watch::Receiver<bool>,
    ) -> StepResult {
        let started = Instant::now();
        let max_attempts = step.remaining_retries() + 1;
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;
            match self.call(step).await {
                Err(e) if e.is_transient() && attempts < max_attempts && !is_cancelled(cancel) => {
                    metrics::counter!("saga_step_retries_total", "service" => step.service.clone())
                        .increment(1);
                    tracing::warn!(
                        step = index,
                        attempt = attempts,
                        error = %e,
                        "saga step failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                outcome => break outcome,
            }
        };

        let elapsed = started.elapsed();
        metrics::histogram!("saga_step_duration_seconds", "service" => step.service.clone())
            .record(elapsed.as_secs_f64());
        if let Err(e) = &outcome {
            tracing::warn!(step = index, attempts, error = %e, "saga step failed");
        }

        StepResult::from_outcome(index, outcome, millis(elapsed), attempts)
    }

    /// Compensates `completed` steps in reverse order, checkpointing after
    /// each one.
    ///
    /// Steps without a compensation payload are skipped. A failed
    /// compensation is recorded and the remaining ones still run.
    async fn compensate(
        &self,
        saga: &Saga,
        completed: &[SagaStep],
        execution: &mut SagaExecution,
    ) {
        tracing::info!(
            failed_step = completed.len(),
            "executing compensation for failed saga"
        );

        for (index, step) in completed.iter().enumerate().rev() {
            let Some(compensation) = step.compensation_step() else {
                continue;
            };

            tracing::info!(
                step = index,
                operation = %compensation.operation,
                "executing compensation"
            );
            let started = Instant::now();
            let outcome = self.call(&compensation).await;
            if let Err(e) = &outcome {
                metrics::counter!("saga_compensation_failures_total").increment(1);
                tracing::error!(step = index, error = %e, "compensation failed");
            }

            execution.compensation_results.push(StepResult::from_outcome(
                index,
                outcome,
                millis(started.elapsed()),
                1,
            ));
            execution.updated_at = Utc::now();
            self.checkpoint(saga, execution).await;
        }
    }

    /// Dispatches a step under its timeout.
    async fn call(&self, step: &SagaStep) -> Result<Value> {
        let timeout = step.timeout();
        match tokio::time::timeout(timeout, self.dispatcher.dispatch(step)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SagaError::StepTimeout {
                seconds: timeout.as_secs(),
            }),
        }
    }

    /// Persists progress. Failures are logged; the saga keeps running.
    async fn checkpoint(&self, saga: &Saga, execution: &SagaExecution) {
        if let Err(e) = self.try_checkpoint(saga, execution).await {
            tracing::error!(error = %e, "failed to checkpoint saga");
        }
    }

    async fn try_checkpoint(&self, saga: &Saga, execution: &SagaExecution) -> Result<()> {
        self.store
            .update_saga(
                &saga.id,
                saga.status.as_str(),
                saga.current_step,
                saga.updated_at,
            )
            .await?;
        self.store.update_execution(execution.to_record()?).await?;
        Ok(())
    }

    async fn publish_completion(&self, saga: &Saga, execution: &SagaExecution) {
        let event = SagaEvent::saga_completed(saga, execution);
        let event_type = event.event_type();
        let published = match serde_json::to_value(&event) {
            Ok(payload) => self
                .publisher
                .publish(SAGA_EVENTS_CHANNEL, payload)
                .await
                .map_err(SagaError::from),
            Err(e) => Err(e.into()),
        };
        match published {
            Ok(()) => tracing::debug!(event_type, "saga event published"),
            Err(e) => tracing::warn!(error = %e, event_type, "failed to publish saga event"),
        }
    }
}

fn set_status(saga: &mut Saga, execution: &mut SagaExecution, status: SagaStatus) {
    saga.status = status;
    execution.status = status;
    touch(saga, execution);
}

fn touch(saga: &mut Saga, execution: &mut SagaExecution) {
    let now = Utc::now();
    saga.updated_at = now;
    execution.updated_at = now;
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryGameplayService, InMemoryInventoryService, InMemoryUserService};
    use crate::state::StepStatus;
    use state_store::{InMemoryPublisher, InMemorySyncStore};

    type TestCoordinator = SagaCoordinator<
        InMemorySyncStore,
        InMemoryPublisher,
        InMemoryUserService,
        InMemoryInventoryService,
        InMemoryGameplayService,
    >;

    fn setup() -> (
        TestCoordinator,
        InMemorySyncStore,
        InMemoryPublisher,
        InMemoryUserService,
    ) {
        let store = InMemorySyncStore::new();
        let publisher = InMemoryPublisher::new();
        let users = InMemoryUserService::new();

        let coordinator = SagaCoordinator::with_config(
            store.clone(),
            publisher.clone(),
            Dispatcher::new(
                users.clone(),
                InMemoryInventoryService::new(),
                InMemoryGameplayService::new(),
            ),
            CoordinatorConfig {
                retry_backoff: Duration::from_millis(5),
            },
        );
        coordinator.start();

        (coordinator, store, publisher, users)
    }

    async fn wait_for_terminal(coordinator: &TestCoordinator, saga_id: &SagaId) -> SagaExecution {
        for _ in 0..500 {
            let execution = coordinator.get_saga_status(saga_id).await.unwrap();
            if execution.status.is_terminal() {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("saga {saga_id} did not finish");
    }

    fn create_user(user_id: &str) -> SagaStep {
        SagaStep::new("user-service", "create_user", json!({"user_id": user_id}))
            .with_compensation(json!({"user_id": user_id}))
    }

    #[tokio::test]
    async fn test_happy_path() {
        let (coordinator, _, publisher, users) = setup();

        let saga = coordinator
            .start_saga(
                "user_provisioning",
                vec![
                    create_user("u1"),
                    SagaStep::new(
                        "user-service",
                        "update_user",
                        json!({"user_id": "u1", "name": "Ana"}),
                    ),
                    create_user("u2"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(saga.status, SagaStatus::Pending);
        assert_eq!(saga.current_step, -1);

        let execution = wait_for_terminal(&coordinator, &saga.id).await;
        assert_eq!(execution.status, SagaStatus::Completed);
        assert_eq!(execution.current_step, 2);
        assert_eq!(execution.step_results.len(), 3);
        assert!(execution.step_results.values().all(StepResult::succeeded));
        assert!(execution.compensation_results.is_empty());
        assert_eq!(users.user_count().await, 2);

        let stored = coordinator.get_saga(&saga.id).await.unwrap();
        assert_eq!(stored.status, SagaStatus::Completed);

        coordinator.stop().await;
        let events = publisher.published(SAGA_EVENTS_CHANNEL).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["status"], "completed");
        assert_eq!(events[0]["steps"], 3);
    }

    #[tokio::test]
    async fn test_failure_compensates_previous_steps() {
        let (coordinator, _, _, users) = setup();

        let saga = coordinator
            .start_saga(
                "user_provisioning",
                vec![
                    create_user("u1"),
                    create_user("u2"),
                    SagaStep::new("user-service", "unknown_op", json!({}))
                        .with_compensation(json!({})),
                ],
            )
            .await
            .unwrap();

        let execution = wait_for_terminal(&coordinator, &saga.id).await;
        assert_eq!(execution.status, SagaStatus::Failed);
        assert_eq!(execution.step_results[&0].status, StepStatus::Succeeded);
        assert_eq!(execution.step_results[&1].status, StepStatus::Succeeded);
        assert_eq!(execution.step_results[&2].status, StepStatus::Failed);
        assert_eq!(execution.step_results[&2].attempts, 1);

        let compensated: Vec<usize> = execution
            .compensation_results
            .iter()
            .map(|r| r.step_index)
            .collect();
        assert_eq!(compensated, vec![1, 0]);
        assert!(execution.compensation_results.iter().all(StepResult::succeeded));
        assert_eq!(execution.metadata["failed_step"], 2);
        assert!(!execution.was_cancelled());
        assert_eq!(users.user_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_saga_is_not_persisted() {
        let (coordinator, store, _, users) = setup();

        let result = coordinator.start_saga("x", vec![]).await;
        assert!(matches!(result, Err(SagaError::Validation(_))));

        let result = coordinator
            .start_saga("x", vec![SagaStep::new("", "create_user", json!({}))])
            .await;
        assert!(matches!(result, Err(SagaError::Validation(_))));

        let result = coordinator
            .start_saga(
                "x",
                vec![SagaStep::new(
                    "user-service",
                    "compensate_delete_user",
                    json!({"user_id": "u1"}),
                )],
            )
            .await;
        assert!(matches!(result, Err(SagaError::Validation(_))));
        assert_eq!(store.saga_count().await, 0);
        assert!(users.faults().calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_saga() {
        let (coordinator, _, _, _) = setup();
        let id = SagaId::new();

        assert!(matches!(
            coordinator.get_saga_status(&id).await,
            Err(SagaError::NotFound(_))
        ));
        assert!(matches!(
            coordinator.cancel_saga(&id).await,
            Err(SagaError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stopped_coordinator_rejects_sagas() {
        let (coordinator, store, _, _) = setup();
        coordinator.stop().await;
        assert!(!coordinator.is_running());

        let result = coordinator.start_saga("x", vec![create_user("u1")]).await;
        assert!(matches!(result, Err(SagaError::NotRunning)));
        assert_eq!(store.saga_count().await, 0);
    }

    #[tokio::test]
    async fn test_persist_failure_is_returned() {
        let (coordinator, store, _, users) = setup();
        store.set_fail_writes(true);

        let result = coordinator.start_saga("x", vec![create_user("u1")]).await;
        assert!(matches!(result, Err(SagaError::Store(_))));
        assert_eq!(coordinator.active_sagas().await, 0);
        assert!(users.faults().calls().await.is_empty());
    }
}
