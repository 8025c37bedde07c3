//! Persistence layer for the data-synchronization core.
//!
//! Rows are plain records with JSON columns for opaque state; the typed
//! domain model lives in `sync-core` and `saga` and converts to and from
//! these records at the boundary.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod publish;
pub mod record;
pub mod store;

pub use common::{ConflictId, SagaId};
pub use error::{Result, StoreError};
pub use memory::InMemorySyncStore;
pub use postgres::PostgresSyncStore;
pub use publish::{
    CONFLICT_EVENTS_CHANNEL, EventPublisher, InMemoryPublisher, PublishedMessage,
    SAGA_EVENTS_CHANNEL,
};
pub use record::{ConflictRecord, ExecutionRecord, SagaRecord, StateRecord};
pub use store::{
    ConflictStore, RESOLVED_STATE_TTL, ResolvedStateCache, SagaStore, StateStore, expires_at,
    resolved_state_key,
};
