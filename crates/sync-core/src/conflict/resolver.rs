//! Conflict resolver: detection, persistence, and resolution.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::ConflictId;
use serde_json::{Map, Value, json};
use state_store::{
    CONFLICT_EVENTS_CHANNEL, ConflictStore, EventPublisher, RESOLVED_STATE_TTL,
    ResolvedStateCache, StoreError, resolved_state_key,
};

use crate::conflict::classify::{classify, is_critical, priority, severity};
use crate::conflict::merge::{MergeStrategy, merge_states};
use crate::conflict::{Conflict, ConflictType, Resolution, events};
use crate::error::{Result, SyncError};
use crate::state::{Category, StatePayload};

/// Resolver tuning.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How long resolved states stay in the keyed cache.
    pub resolved_state_ttl: Duration,
    /// Concurrent modifications at or above this priority go to manual review.
    pub manual_review_priority: u8,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            resolved_state_ttl: RESOLVED_STATE_TTL,
            manual_review_priority: 8,
        }
    }
}

/// Detects and resolves conflicts between stored and incoming state.
///
/// Stateless per call: every read goes to the store. Concurrent detections
/// on the same (key, category) are not serialized and may both persist a
/// conflict for the same divergence.
pub struct ConflictResolver<S, P>
where
    S: ConflictStore + ResolvedStateCache,
    P: EventPublisher,
{
    store: S,
    publisher: P,
    config: ResolverConfig,
}

impl<S, P> ConflictResolver<S, P>
where
    S: ConflictStore + ResolvedStateCache,
    P: EventPublisher,
{
    /// Creates a resolver with default configuration.
    pub fn new(store: S, publisher: P) -> Self {
        Self::with_config(store, publisher, ResolverConfig::default())
    }

    /// Creates a resolver with explicit configuration.
    pub fn with_config(store: S, publisher: P, config: ResolverConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Returns the resolver configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Compares an old and new state and records a conflict if they diverge
    /// in a way that needs resolution.
    ///
    /// Returns `Ok(None)` when the states are equal, or when the divergence
    /// is not critical (the new state is accepted as last-write-wins).
    #[tracing::instrument(skip(self, old_state, new_state), fields(category = %category))]
    pub async fn detect_conflict(
        &self,
        key: &str,
        category: &Category,
        old_state: &StatePayload,
        new_state: &StatePayload,
    ) -> Result<Option<Conflict>> {
        if old_state == new_state {
            return Ok(None);
        }

        let conflict_type = classify(category, old_state, new_state);

        if !is_critical(conflict_type, category) {
            metrics::counter!(
                "sync_conflicts_auto_accepted_total",
                "category" => category.to_string()
            )
            .increment(1);
            tracing::info!(
                key,
                conflict_type = %conflict_type,
                strategy = Resolution::LastWriteWins.as_str(),
                "auto-resolving non-critical conflict"
            );
            return Ok(None);
        }

        let priority = priority(conflict_type, category);
        let detected_at = Utc::now();
        let conflict = Conflict {
            id: ConflictId::new(),
            key: key.to_string(),
            category: category.clone(),
            old_state: old_state.clone(),
            new_state: new_state.clone(),
            conflict_type,
            detected_at,
            resolved_at: None,
            resolution: None,
            metadata: conflict_metadata(key, category, old_state, new_state, priority, detected_at),
            priority,
        };

        if let Err(e) = self.store.insert_conflict(conflict.to_record()).await {
            tracing::error!(error = %e, conflict_id = %conflict.id, "failed to persist conflict");
            return Err(e.into());
        }

        metrics::counter!(
            "sync_conflicts_detected_total",
            "category" => category.to_string(),
            "type" => conflict_type.as_str()
        )
        .increment(1);
        tracing::info!(
            conflict_id = %conflict.id,
            key,
            conflict_type = %conflict_type,
            priority,
            "conflict detected"
        );

        self.publish(events::conflict_detected(&conflict)).await;

        Ok(Some(conflict))
    }

    /// Applies the conflict's resolution.
    ///
    /// The resolution must already be set. On success `resolved_at` is set,
    /// the resolution is persisted and published, and the resolved state is
    /// written to the keyed cache. A conflict is resolved at most once.
    #[tracing::instrument(skip(self, conflict), fields(conflict_id = %conflict.id))]
    pub async fn resolve_conflict(&self, conflict: &mut Conflict) -> Result<()> {
        if conflict.is_resolved() {
            return Err(SyncError::AlreadyResolved(conflict.id.clone()));
        }

        let resolution = conflict
            .resolution
            .ok_or_else(|| SyncError::UnknownResolution(conflict.id.clone()))?;

        tracing::info!(strategy = resolution.as_str(), "resolving conflict");

        let resolved_state = match resolution {
            Resolution::LastWriteWins => conflict.new_state.clone(),
            Resolution::Merge => merge_states(
                &conflict.old_state,
                &conflict.new_state,
                MergeStrategy::Union,
            ),
            Resolution::KeepOld => conflict.old_state.clone(),
            Resolution::Manual => {
                return Err(SyncError::ManualResolutionRequired(conflict.id.clone()));
            }
        };

        let resolved_at = Utc::now();
        self.store
            .mark_conflict_resolved(&conflict.id, resolution.as_str(), resolved_at)
            .await
            .map_err(|e| match e {
                StoreError::ConflictAlreadyResolved(id) => SyncError::AlreadyResolved(id),
                StoreError::ConflictNotFound(id) => SyncError::ConflictNotFound(id),
                other => SyncError::Store(other),
            })?;
        conflict.resolved_at = Some(resolved_at);

        self.publish(events::conflict_resolved(conflict)).await;

        let cache_key = resolved_state_key(conflict.category.as_str(), &conflict.key);
        if let Err(source) = self
            .store
            .set_resolved(
                &cache_key,
                resolved_state.to_json(),
                self.config.resolved_state_ttl,
            )
            .await
        {
            tracing::error!(error = %source, "failed to apply resolved state");
            return Err(SyncError::ApplyResolvedState { cache_key, source });
        }

        metrics::counter!(
            "sync_conflicts_resolved_total",
            "resolution" => resolution.as_str()
        )
        .increment(1);
        tracing::info!(strategy = resolution.as_str(), "conflict resolved successfully");

        Ok(())
    }

    /// Picks a resolution from the conflict's type and priority, then
    /// resolves it.
    ///
    /// When the policy picks [`Resolution::Manual`] the choice is recorded on
    /// the conflict and `ManualResolutionRequired` is returned.
    #[tracing::instrument(skip(self, conflict), fields(conflict_id = %conflict.id))]
    pub async fn auto_resolve_conflict(&self, conflict: &mut Conflict) -> Result<()> {
        if conflict.is_resolved() {
            return Err(SyncError::AlreadyResolved(conflict.id.clone()));
        }

        let resolution = self.auto_resolution(conflict.conflict_type, conflict.priority);
        conflict.resolution = Some(resolution);

        if resolution == Resolution::Manual {
            tracing::info!(
                priority = conflict.priority,
                "conflict requires manual resolution"
            );
            return Err(SyncError::ManualResolutionRequired(conflict.id.clone()));
        }

        self.resolve_conflict(conflict).await
    }

    /// Resolution the automatic policy picks for a conflict.
    pub fn auto_resolution(&self, conflict_type: ConflictType, priority: u8) -> Resolution {
        match conflict_type {
            ConflictType::ConcurrentModification
                if priority >= self.config.manual_review_priority =>
            {
                Resolution::Manual
            }
            ConflictType::ConcurrentModification => Resolution::LastWriteWins,
            ConflictType::VersionConflict => Resolution::Merge,
            ConflictType::DataInconsistency => Resolution::KeepOld,
            ConflictType::SchemaMismatch | ConflictType::BusinessRuleViolation => {
                Resolution::Manual
            }
        }
    }

    /// Unresolved conflicts, highest priority first, oldest first within a
    /// priority.
    pub async fn pending_conflicts(&self, limit: usize) -> Result<Vec<Conflict>> {
        self.store
            .pending_conflicts(limit)
            .await?
            .into_iter()
            .map(Conflict::try_from)
            .collect()
    }

    /// Point read of a persisted conflict.
    pub async fn get_conflict(&self, id: &ConflictId) -> Result<Conflict> {
        let record = self
            .store
            .get_conflict(id)
            .await?
            .ok_or_else(|| SyncError::ConflictNotFound(id.clone()))?;
        Conflict::try_from(record)
    }

    /// Reads the resolved state written for (category, key), if it has not
    /// expired.
    pub async fn resolved_state(
        &self,
        category: &Category,
        key: &str,
    ) -> Result<Option<StatePayload>> {
        let cache_key = resolved_state_key(category.as_str(), key);
        let value = self.store.get_resolved(&cache_key).await?;
        Ok(value.map(StatePayload::from))
    }

    async fn publish(&self, event: Value) {
        if let Err(e) = self.publisher.publish(CONFLICT_EVENTS_CHANNEL, event).await {
            tracing::warn!(error = %e, "failed to publish conflict event");
        }
    }
}

fn conflict_metadata(
    key: &str,
    category: &Category,
    old_state: &StatePayload,
    new_state: &StatePayload,
    priority: u8,
    detected_at: DateTime<Utc>,
) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("key".to_string(), json!(key));
    metadata.insert("category".to_string(), json!(category.as_str()));
    metadata.insert("timestamp".to_string(), json!(detected_at.timestamp()));
    metadata.insert("old_type".to_string(), json!(old_state.kind()));
    metadata.insert("new_type".to_string(), json!(new_state.kind()));
    metadata.insert("severity".to_string(), json!(severity(priority)));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use state_store::{InMemoryPublisher, InMemorySyncStore, SAGA_EVENTS_CHANNEL};

    fn resolver() -> (
        ConflictResolver<InMemorySyncStore, InMemoryPublisher>,
        InMemorySyncStore,
        InMemoryPublisher,
    ) {
        let store = InMemorySyncStore::new();
        let publisher = InMemoryPublisher::new();
        let resolver = ConflictResolver::new(store.clone(), publisher.clone());
        (resolver, store, publisher)
    }

    fn payload(value: Value) -> StatePayload {
        StatePayload::from(value)
    }

    #[tokio::test]
    async fn test_equal_states_are_not_conflicts() {
        let (resolver, store, publisher) = resolver();
        let state = payload(json!({"currency": 5, "items": ["a"]}));

        let result = resolver
            .detect_conflict("p1", &Category::UserInventory, &state, &state)
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(store.conflict_count().await, 0);
        assert!(publisher.published(CONFLICT_EVENTS_CHANNEL).await.is_empty());
    }

    #[tokio::test]
    async fn test_both_absent_is_equal() {
        let (resolver, _, _) = resolver();
        let result = resolver
            .detect_conflict(
                "p1",
                &Category::UserProfile,
                &StatePayload::Absent,
                &StatePayload::Absent,
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_integer_and_float_level_is_not_a_conflict() {
        let (resolver, store, publisher) = resolver();

        let result = resolver
            .detect_conflict(
                "p1",
                &Category::GameState,
                &payload(json!({"level": 1})),
                &payload(json!({"level": 1.0})),
            )
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(store.conflict_count().await, 0);
        assert!(publisher.published(CONFLICT_EVENTS_CHANNEL).await.is_empty());
    }

    #[tokio::test]
    async fn test_critical_conflict_is_persisted_and_published() {
        let (resolver, store, publisher) = resolver();

        let conflict = resolver
            .detect_conflict(
                "p1",
                &Category::UserInventory,
                &payload(json!({"currency": 5, "items": ["a"]})),
                &payload(json!({"currency": 5, "items": ["a", "b"]})),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(conflict.conflict_type, ConflictType::ConcurrentModification);
        assert_eq!(conflict.priority, 6);
        assert!(conflict.id.as_str().starts_with("conflict-"));
        assert_eq!(conflict.metadata["severity"], "medium");
        assert_eq!(conflict.metadata["old_type"], "record");
        assert_eq!(store.conflict_count().await, 1);

        let events = publisher.published(CONFLICT_EVENTS_CHANNEL).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "conflict_detected");
        assert_eq!(events[0]["conflict_id"], conflict.id.as_str());
        assert!(publisher.published(SAGA_EVENTS_CHANNEL).await.is_empty());
    }

    #[tokio::test]
    async fn test_non_critical_conflict_is_not_persisted() {
        let (resolver, store, publisher) = resolver();

        let result = resolver
            .detect_conflict(
                "p1",
                &Category::Other("unknown_category".to_string()),
                &payload(json!({"a": 1})),
                &payload(json!({"a": 2})),
            )
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(store.conflict_count().await, 0);
        assert!(publisher.published(CONFLICT_EVENTS_CHANNEL).await.is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_returns_error() {
        let (resolver, store, publisher) = resolver();
        store.set_fail_writes(true);

        let result = resolver
            .detect_conflict(
                "p1",
                &Category::UserProfile,
                &payload(json!({"username": "a"})),
                &payload(json!({"username": "b"})),
            )
            .await;

        assert!(matches!(result, Err(SyncError::Store(StoreError::Unavailable(_)))));
        assert!(publisher.published(CONFLICT_EVENTS_CHANNEL).await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_fails_without_panicking() {
        let store = InMemorySyncStore::new();
        let resolver = ConflictResolver::with_config(
            store.clone(),
            InMemoryPublisher::new(),
            ResolverConfig {
                resolved_state_ttl: Duration::from_secs(u64::MAX),
                ..ResolverConfig::default()
            },
        );

        let mut conflict = resolver
            .detect_conflict(
                "p1",
                &Category::UserInventory,
                &payload(json!({"currency": 1})),
                &payload(json!({"currency": 2})),
            )
            .await
            .unwrap()
            .unwrap();
        conflict.resolution = Some(Resolution::LastWriteWins);

        let result = resolver.resolve_conflict(&mut conflict).await;
        assert!(matches!(
            result,
            Err(SyncError::ApplyResolvedState {
                source: StoreError::InvalidTtl(_),
                ..
            })
        ));
        assert!(
            resolver
                .resolved_state(&Category::UserInventory, "p1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_resolve_keep_old_writes_cache() {
        let (resolver, store, publisher) = resolver();
        let old = payload(json!({"currency": 1, "slots": 10}));
        let new = payload(json!({"currency": 1, "slots": 12}));

        let mut conflict = resolver
            .detect_conflict("p2", &Category::UserInventory, &old, &new)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conflict.conflict_type, ConflictType::DataInconsistency);

        conflict.resolution = Some(Resolution::KeepOld);
        resolver.resolve_conflict(&mut conflict).await.unwrap();

        assert!(conflict.is_resolved());
        let cached = store
            .get_resolved("sync:resolved:user_inventory:p2")
            .await
            .unwrap();
        assert_eq!(cached, Some(old.to_json()));

        let stored = resolver.get_conflict(&conflict.id).await.unwrap();
        assert_eq!(stored.resolution, Some(Resolution::KeepOld));
        assert!(stored.resolved_at.is_some());

        let events = publisher.published(CONFLICT_EVENTS_CHANNEL).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["type"], "conflict_resolved");
        assert_eq!(events[1]["resolution"], "keep_old");
    }

    #[tokio::test]
    async fn test_resolve_merge_uses_union() {
        let (resolver, _, _) = resolver();
        let mut conflict = resolver
            .detect_conflict(
                "p3",
                &Category::GameState,
                &payload(json!({"level": 4, "zone": "north"})),
                &payload(json!({"level": 5, "hp": 90})),
            )
            .await
            .unwrap()
            .unwrap();

        conflict.resolution = Some(Resolution::Merge);
        resolver.resolve_conflict(&mut conflict).await.unwrap();

        let resolved = resolver
            .resolved_state(&Category::GameState, "p3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            resolved,
            payload(json!({"level": 5, "zone": "north", "hp": 90}))
        );
    }

    #[tokio::test]
    async fn test_manual_and_missing_resolution_leave_conflict_unresolved() {
        let (resolver, _, _) = resolver();
        let mut conflict = resolver
            .detect_conflict(
                "p4",
                &Category::UserProfile,
                &payload(json!({"username": "a"})),
                &payload(json!({"username": "b"})),
            )
            .await
            .unwrap()
            .unwrap();

        let missing = resolver.resolve_conflict(&mut conflict).await;
        assert!(matches!(missing, Err(SyncError::UnknownResolution(_))));

        conflict.resolution = Some(Resolution::Manual);
        let manual = resolver.resolve_conflict(&mut conflict).await;
        assert!(matches!(manual, Err(SyncError::ManualResolutionRequired(_))));

        assert!(!conflict.is_resolved());
        assert_eq!(resolver.pending_conflicts(10).await.unwrap().len(), 1);

        // A human can retry with a concrete strategy.
        conflict.resolution = Some(Resolution::KeepOld);
        resolver.resolve_conflict(&mut conflict).await.unwrap();
        assert!(resolver.pending_conflicts(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolution_is_single_shot() {
        let (resolver, store, _) = resolver();
        let mut conflict = resolver
            .detect_conflict(
                "p5",
                &Category::UserInventory,
                &payload(json!({"currency": 1})),
                &payload(json!({"currency": 2})),
            )
            .await
            .unwrap()
            .unwrap();

        conflict.resolution = Some(Resolution::LastWriteWins);
        resolver.resolve_conflict(&mut conflict).await.unwrap();

        conflict.resolution = Some(Resolution::KeepOld);
        let second = resolver.resolve_conflict(&mut conflict).await;
        assert!(matches!(second, Err(SyncError::AlreadyResolved(_))));

        // A stale copy that never saw the first resolution is rejected by the store.
        let mut stale = conflict.clone();
        stale.resolved_at = None;
        let third = resolver.resolve_conflict(&mut stale).await;
        assert!(matches!(third, Err(SyncError::AlreadyResolved(_))));

        let cached = store
            .get_resolved("sync:resolved:user_inventory:p5")
            .await
            .unwrap();
        assert_eq!(cached, Some(json!({"currency": 2})));
        let stored = resolver.get_conflict(&conflict.id).await.unwrap();
        assert_eq!(stored.resolution, Some(Resolution::LastWriteWins));
    }

    #[tokio::test]
    async fn test_auto_resolve_policy() {
        let (resolver, _, _) = resolver();
        assert_eq!(
            resolver.auto_resolution(ConflictType::ConcurrentModification, 6),
            Resolution::LastWriteWins
        );
        assert_eq!(
            resolver.auto_resolution(ConflictType::ConcurrentModification, 8),
            Resolution::Manual
        );
        assert_eq!(
            resolver.auto_resolution(ConflictType::VersionConflict, 7),
            Resolution::Merge
        );
        assert_eq!(
            resolver.auto_resolution(ConflictType::DataInconsistency, 5),
            Resolution::KeepOld
        );
        assert_eq!(
            resolver.auto_resolution(ConflictType::BusinessRuleViolation, 10),
            Resolution::Manual
        );
        assert_eq!(
            resolver.auto_resolution(ConflictType::SchemaMismatch, 9),
            Resolution::Manual
        );
    }

    #[tokio::test]
    async fn test_auto_resolve_business_rule_violation_requires_manual() {
        let (resolver, _, _) = resolver();
        let mut conflict = resolver
            .detect_conflict(
                "p6",
                &Category::UserProfile,
                &payload(json!({"username": "old"})),
                &payload(json!({"username": "new"})),
            )
            .await
            .unwrap()
            .unwrap();

        let result = resolver.auto_resolve_conflict(&mut conflict).await;
        assert!(matches!(result, Err(SyncError::ManualResolutionRequired(_))));
        assert_eq!(conflict.resolution, Some(Resolution::Manual));
        assert!(!conflict.is_resolved());
    }

    #[tokio::test]
    async fn test_auto_resolve_inventory_last_write_wins() {
        let (resolver, _, _) = resolver();
        let mut conflict = resolver
            .detect_conflict(
                "p7",
                &Category::UserInventory,
                &payload(json!({"currency": 1})),
                &payload(json!({"currency": 9})),
            )
            .await
            .unwrap()
            .unwrap();

        resolver.auto_resolve_conflict(&mut conflict).await.unwrap();
        assert_eq!(conflict.resolution, Some(Resolution::LastWriteWins));
        assert_eq!(
            resolver
                .resolved_state(&Category::UserInventory, "p7")
                .await
                .unwrap(),
            Some(payload(json!({"currency": 9})))
        );
    }

    #[tokio::test]
    async fn test_get_unknown_conflict() {
        let (resolver, _, _) = resolver();
        let result = resolver.get_conflict(&ConflictId::new()).await;
        assert!(matches!(result, Err(SyncError::ConflictNotFound(_))));
    }
}
