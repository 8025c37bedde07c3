//! Sync manager: wires state access and conflict handling together.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use common::{ActiveGauge, ConflictId};
use state_store::{ConflictStore, EventPublisher, ResolvedStateCache, StateStore};

use crate::conflict::{Conflict, ConflictResolver, ResolverConfig};
use crate::error::{Result, SyncError};
use crate::state::{Category, StateManager, StatePayload, SyncState};

/// What happened to an incoming state value.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The value was written and its version advanced.
    Applied(SyncState),
    /// The value equals the stored one; nothing was written.
    Unchanged(SyncState),
    /// The value diverges critically from the stored one. The stored state is
    /// left untouched until the conflict is resolved.
    Conflicted(Conflict),
}

impl SyncOutcome {
    fn label(&self) -> &'static str {
        match self {
            SyncOutcome::Applied(_) => "applied",
            SyncOutcome::Unchanged(_) => "unchanged",
            SyncOutcome::Conflicted(_) => "conflicted",
        }
    }
}

/// Facade over [`StateManager`] and [`ConflictResolver`].
pub struct SyncManager<S, P>
where
    S: StateStore + ConflictStore + ResolvedStateCache + Clone,
    P: EventPublisher,
{
    states: StateManager<S>,
    resolver: ConflictResolver<S, P>,
    running: Arc<AtomicBool>,
}

impl<S, P> SyncManager<S, P>
where
    S: StateStore + ConflictStore + ResolvedStateCache + Clone,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self::with_config(store, publisher, ResolverConfig::default())
    }

    pub fn with_config(store: S, publisher: P, config: ResolverConfig) -> Self {
        Self {
            states: StateManager::new(store.clone()),
            resolver: ConflictResolver::with_config(store, publisher, config),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn states(&self) -> &StateManager<S> {
        &self.states
    }

    pub fn resolver(&self) -> &ConflictResolver<S, P> {
        &self.resolver
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            tracing::info!("sync manager started");
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("sync manager stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Accepts an incoming value for (key, category).
    ///
    /// The first value for a key is always applied. Later values are checked
    /// against the stored one; non-critical divergence is applied as
    /// last-write-wins and critical divergence produces a conflict.
    #[tracing::instrument(skip(self, value), fields(category = %category))]
    pub async fn sync_state(
        &self,
        key: &str,
        category: &Category,
        value: StatePayload,
    ) -> Result<SyncOutcome> {
        if !self.is_running() {
            return Err(SyncError::NotRunning);
        }

        let start = Instant::now();
        let result = {
            let _active = ActiveGauge::enter("sync_active_operations");
            self.apply(key, category, value).await
        };

        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        metrics::counter!(
            "sync_operations_total",
            "category" => category.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("sync_operation_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        result
    }

    async fn apply(
        &self,
        key: &str,
        category: &Category,
        value: StatePayload,
    ) -> Result<SyncOutcome> {
        let Some(current) = self.states.get_state(key, category).await? else {
            let state = self.states.update_state(key, category, value).await?;
            return Ok(SyncOutcome::Applied(state));
        };

        if current.value == value {
            return Ok(SyncOutcome::Unchanged(current));
        }

        match self
            .resolver
            .detect_conflict(key, category, &current.value, &value)
            .await?
        {
            Some(conflict) => Ok(SyncOutcome::Conflicted(conflict)),
            None => {
                let state = self.states.update_state(key, category, value).await?;
                Ok(SyncOutcome::Applied(state))
            }
        }
    }

    /// Auto-resolves up to `limit` pending conflicts and writes each resolved
    /// state back as the current state.
    ///
    /// Conflicts the policy sends to manual review stay pending and are
    /// paged past, so they never hold back lower-priority conflicts. Returns
    /// the conflicts resolved by this call.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_pending(&self, limit: usize) -> Result<Vec<Conflict>> {
        if !self.is_running() {
            return Err(SyncError::NotRunning);
        }

        let mut resolved = Vec::new();
        let mut skipped: HashSet<ConflictId> = HashSet::new();

        while resolved.len() < limit {
            // Skipped conflicts are still pending and come back in every page.
            let window = limit - resolved.len() + skipped.len();
            let page = self.resolver.pending_conflicts(window).await?;
            let exhausted = page.len() < window;
            let mut progressed = false;

            for mut conflict in page {
                if skipped.contains(&conflict.id) {
                    continue;
                }
                progressed = true;

                match self.resolver.auto_resolve_conflict(&mut conflict).await {
                    Ok(()) => {}
                    Err(SyncError::ManualResolutionRequired(id))
                    | Err(SyncError::AlreadyResolved(id)) => {
                        skipped.insert(id);
                        continue;
                    }
                    Err(e) => return Err(e),
                }

                if let Some(state) = self
                    .resolver
                    .resolved_state(&conflict.category, &conflict.key)
                    .await?
                {
                    self.states
                        .update_state(&conflict.key, &conflict.category, state)
                        .await?;
                }
                resolved.push(conflict);
                if resolved.len() == limit {
                    break;
                }
            }

            if exhausted || !progressed {
                break;
            }
        }

        tracing::info!(
            count = resolved.len(),
            skipped = skipped.len(),
            "pending conflicts resolved"
        );
        Ok(resolved)
    }
}
