//! State management and conflict handling for the data-synchronization core.
//!
//! - [`StateManager`] reads and writes versioned (key, category) state.
//! - [`ConflictResolver`] detects, classifies, persists, and resolves
//!   divergent copies of the same state.
//! - [`SyncManager`] wires the two together and owns their lifecycle.

pub mod conflict;
pub mod error;
pub mod manager;
pub mod state;

pub use conflict::{
    Conflict, ConflictResolver, ConflictType, MergeStrategy, Resolution, ResolverConfig,
    merge_states,
};
pub use error::{Result, SyncError};
pub use manager::{SyncManager, SyncOutcome};
pub use state::{Category, StateManager, StatePayload, SyncState};
