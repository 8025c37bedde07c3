//! Storage rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConflictId, SagaId};

/// A persisted conflict.
///
/// `resolution` and `resolved_at` are written together, exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub key: String,
    pub category: String,
    pub old_state: Value,
    pub new_state: Value,
    pub conflict_type: String,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub metadata: Value,
    pub priority: i32,
}

impl ConflictRecord {
    /// Returns true if the conflict has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// A persisted saga definition and its coarse progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub id: SagaId,
    pub saga_type: String,
    pub status: String,
    /// Serialized step list.
    pub steps: Value,
    pub current_step: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The durable mirror of a saga's execution progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub saga_id: SagaId,
    pub status: String,
    pub current_step: i32,
    pub step_results: Value,
    pub compensation_results: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A versioned state value for one (key, category).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub key: String,
    pub category: String,
    pub value: Value,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}
