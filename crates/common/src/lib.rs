//! Shared identifier types and metric helpers for the data-synchronization core.

pub mod gauge;
pub mod types;

pub use gauge::ActiveGauge;
pub use types::{ConflictId, SagaId};
