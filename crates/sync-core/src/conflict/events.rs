//! Envelopes published on the `conflict-events` channel.

use serde::Serialize;
use serde_json::Value;

use crate::conflict::Conflict;

#[derive(Debug, Serialize)]
struct ConflictEvent<'a> {
    #[serde(rename = "type")]
    event_type: &'static str,
    conflict_id: &'a str,
    key: &'a str,
    category: &'a str,
    priority: u8,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved_at: Option<i64>,
}

fn envelope(event_type: &'static str, conflict: &Conflict) -> Value {
    let resolved = conflict.resolved_at.is_some();
    let event = ConflictEvent {
        event_type,
        conflict_id: conflict.id.as_str(),
        key: &conflict.key,
        category: conflict.category.as_str(),
        priority: conflict.priority,
        timestamp: chrono::Utc::now().timestamp(),
        resolution: conflict
            .resolution
            .filter(|_| resolved)
            .map(|r| r.as_str()),
        resolved_at: conflict.resolved_at.map(|t| t.timestamp()),
    };
    // A struct of strings and integers always serializes.
    serde_json::to_value(event).unwrap_or(Value::Null)
}

/// Builds the `conflict_detected` envelope.
pub fn conflict_detected(conflict: &Conflict) -> Value {
    envelope("conflict_detected", conflict)
}

/// Builds the `conflict_resolved` envelope.
pub fn conflict_resolved(conflict: &Conflict) -> Value {
    envelope("conflict_resolved", conflict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ConflictType, Resolution};
    use crate::state::{Category, StatePayload};
    use chrono::Utc;
    use common::ConflictId;
    use serde_json::Map;

    fn conflict() -> Conflict {
        Conflict {
            id: ConflictId::from_string("conflict-0000000000000001"),
            key: "player-9".to_string(),
            category: Category::UserInventory,
            old_state: StatePayload::Absent,
            new_state: StatePayload::Absent,
            conflict_type: ConflictType::ConcurrentModification,
            detected_at: Utc::now(),
            resolved_at: None,
            resolution: None,
            metadata: Map::new(),
            priority: 6,
        }
    }

    #[test]
    fn test_detected_envelope_shape() {
        let event = conflict_detected(&conflict());
        assert_eq!(event["type"], "conflict_detected");
        assert_eq!(event["conflict_id"], "conflict-0000000000000001");
        assert_eq!(event["category"], "user_inventory");
        assert_eq!(event["priority"], 6);
        assert!(event.get("resolution").is_none());
        assert!(event.get("resolved_at").is_none());
    }

    #[test]
    fn test_resolved_envelope_carries_resolution() {
        let mut c = conflict();
        c.resolution = Some(Resolution::KeepOld);
        c.resolved_at = Some(Utc::now());
        let event = conflict_resolved(&c);
        assert_eq!(event["type"], "conflict_resolved");
        assert_eq!(event["resolution"], "keep_old");
        assert!(event["resolved_at"].is_i64());
    }
}
