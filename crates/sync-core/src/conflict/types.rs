//! Conflict model.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::ConflictId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use state_store::ConflictRecord;

use crate::error::SyncError;
use crate::state::{Category, StatePayload};

/// How two copies of a state diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    ConcurrentModification,
    DataInconsistency,
    VersionConflict,
    SchemaMismatch,
    BusinessRuleViolation,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::ConcurrentModification => "concurrent_modification",
            ConflictType::DataInconsistency => "data_inconsistency",
            ConflictType::VersionConflict => "version_conflict",
            ConflictType::SchemaMismatch => "schema_mismatch",
            ConflictType::BusinessRuleViolation => "business_rule_violation",
        }
    }
}

impl FromStr for ConflictType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "concurrent_modification" => Ok(ConflictType::ConcurrentModification),
            "data_inconsistency" => Ok(ConflictType::DataInconsistency),
            "version_conflict" => Ok(ConflictType::VersionConflict),
            "schema_mismatch" => Ok(ConflictType::SchemaMismatch),
            "business_rule_violation" => Ok(ConflictType::BusinessRuleViolation),
            other => Err(SyncError::InvalidRecord(format!(
                "unknown conflict type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy used to settle a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the incoming state.
    LastWriteWins,
    /// Union-merge old and new records, new values winning.
    Merge,
    /// Keep the stored state.
    KeepOld,
    /// Requires a human decision; never applied automatically.
    Manual,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::LastWriteWins => "last_write_wins",
            Resolution::Merge => "merge",
            Resolution::KeepOld => "keep_old",
            Resolution::Manual => "manual",
        }
    }
}

impl FromStr for Resolution {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_write_wins" => Ok(Resolution::LastWriteWins),
            "merge" => Ok(Resolution::Merge),
            "keep_old" => Ok(Resolution::KeepOld),
            "manual" => Ok(Resolution::Manual),
            other => Err(SyncError::InvalidRecord(format!(
                "unknown resolution: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected divergence between the stored and incoming state of one
/// (key, category).
///
/// Persisted unresolved when detected, then resolved exactly once. Never
/// deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub key: String,
    pub category: Category,
    pub old_state: StatePayload,
    pub new_state: StatePayload,
    pub conflict_type: ConflictType,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<Resolution>,
    pub metadata: Map<String, Value>,
    /// 1..=10, higher is more critical.
    pub priority: u8,
}

impl Conflict {
    /// Returns true once a resolution has been applied.
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Converts to the storage row.
    pub fn to_record(&self) -> ConflictRecord {
        ConflictRecord {
            id: self.id.clone(),
            key: self.key.clone(),
            category: self.category.as_str().to_string(),
            old_state: self.old_state.to_json(),
            new_state: self.new_state.to_json(),
            conflict_type: self.conflict_type.as_str().to_string(),
            detected_at: self.detected_at,
            resolved_at: self.resolved_at,
            resolution: self.resolution.map(|r| r.as_str().to_string()),
            metadata: Value::Object(self.metadata.clone()),
            priority: i32::from(self.priority),
        }
    }
}

impl TryFrom<ConflictRecord> for Conflict {
    type Error = SyncError;

    fn try_from(record: ConflictRecord) -> Result<Self, Self::Error> {
        let metadata = match record.metadata {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                return Err(SyncError::InvalidRecord(format!(
                    "conflict {} metadata is not an object: {other}",
                    record.id
                )));
            }
        };
        let priority = u8::try_from(record.priority).map_err(|_| {
            SyncError::InvalidRecord(format!(
                "conflict {} has out-of-range priority {}",
                record.id, record.priority
            ))
        })?;

        Ok(Conflict {
            conflict_type: record.conflict_type.parse()?,
            resolution: record.resolution.as_deref().map(str::parse).transpose()?,
            id: record.id,
            key: record.key,
            category: Category::from(record.category),
            old_state: StatePayload::from(record.old_state),
            new_state: StatePayload::from(record.new_state),
            detected_at: record.detected_at,
            resolved_at: record.resolved_at,
            metadata,
            priority,
        })
    }
}
