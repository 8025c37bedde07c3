use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A state value as seen by the synchronization core.
///
/// JSON `null` maps to [`StatePayload::Absent`] and JSON objects map to
/// [`StatePayload::Record`]; everything else is [`StatePayload::Opaque`].
/// Constructing through `From<Value>` keeps that mapping canonical, so
/// structural equality on this type is the equality conflicts are
/// detected with. Numbers compare by value: `1` equals `1.0`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum StatePayload {
    #[default]
    Absent,
    Record(Map<String, Value>),
    Opaque(Value),
}

impl StatePayload {
    /// Returns the record fields if this is a key/value record.
    pub fn as_record(&self) -> Option<&Map<String, Value>> {
        match self {
            StatePayload::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Returns true if this is a key/value record.
    pub fn is_record(&self) -> bool {
        matches!(self, StatePayload::Record(_))
    }

    /// Looks up a field of a record. Non-records have no fields.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_record().and_then(|fields| fields.get(name))
    }

    /// Compares one field of two payloads; a field missing on both sides
    /// is not a difference.
    pub fn field_differs(&self, other: &StatePayload, name: &str) -> bool {
        match (self.field(name), other.field(name)) {
            (Some(a), Some(b)) => !json_eq(a, b),
            (None, None) => false,
            _ => true,
        }
    }

    /// Short name of the variant, used in conflict metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            StatePayload::Absent => "absent",
            StatePayload::Record(_) => "record",
            StatePayload::Opaque(_) => "opaque",
        }
    }

    /// Converts to the JSON stored and published for this payload.
    pub fn to_json(&self) -> Value {
        Value::from(self.clone())
    }
}

impl PartialEq for StatePayload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StatePayload::Absent, StatePayload::Absent) => true,
            (StatePayload::Record(a), StatePayload::Record(b)) => maps_eq(a, b),
            (StatePayload::Opaque(a), StatePayload::Opaque(b)) => json_eq(a, b),
            _ => false,
        }
    }
}

/// JSON equality with every number compared as `f64`, at any depth.
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(x), Value::Object(y)) => maps_eq(x, y),
        _ => a == b,
    }
}

fn maps_eq(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(key, value)| b.get(key).is_some_and(|other| json_eq(value, other)))
}

impl From<Value> for StatePayload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => StatePayload::Absent,
            Value::Object(fields) => StatePayload::Record(fields),
            other => StatePayload::Opaque(other),
        }
    }
}

impl From<StatePayload> for Value {
    fn from(payload: StatePayload) -> Self {
        match payload {
            StatePayload::Absent => Value::Null,
            StatePayload::Record(fields) => Value::Object(fields),
            StatePayload::Opaque(value) => value,
        }
    }
}

impl From<Map<String, Value>> for StatePayload {
    fn from(fields: Map<String, Value>) -> Self {
        StatePayload::Record(fields)
    }
}
