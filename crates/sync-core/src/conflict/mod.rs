//! Conflict detection, classification, and resolution.

pub mod classify;
pub mod events;
pub mod merge;
pub mod resolver;
pub mod types;

pub use merge::{MergeStrategy, merge_states};
pub use resolver::{ConflictResolver, ResolverConfig};
pub use types::{Conflict, ConflictType, Resolution};
