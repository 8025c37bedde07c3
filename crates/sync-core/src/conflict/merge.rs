//! Record merge strategies.

use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::state::StatePayload;

/// How two conflicting records are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Keys present in either record; shared keys take the new value.
    Union,
    /// Keys present in both records, valued from the new record.
    Intersection,
    /// The new state, unchanged.
    Override,
}

/// Merges `old` and `new` with the given strategy.
///
/// If either side is not a record there is nothing to merge field-wise and
/// the new state wins.
pub fn merge_states(
    old: &StatePayload,
    new: &StatePayload,
    strategy: MergeStrategy,
) -> StatePayload {
    let (StatePayload::Record(old_fields), StatePayload::Record(new_fields)) = (old, new) else {
        return new.clone();
    };

    match strategy {
        MergeStrategy::Union => {
            let mut merged = old_fields.clone();
            for (key, value) in new_fields {
                merged.insert(key.clone(), value.clone());
            }
            StatePayload::Record(merged)
        }
        MergeStrategy::Intersection => {
            let merged: Map<_, _> = new_fields
                .iter()
                .filter(|(key, _)| old_fields.contains_key(*key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            StatePayload::Record(merged)
        }
        MergeStrategy::Override => new.clone(),
    }
}
