//! Versioned synchronization state.

pub mod category;
pub mod manager;
pub mod payload;

pub use category::Category;
pub use manager::{StateManager, SyncState};
pub use payload::StatePayload;
