//! The event record queued on disk and forwarded to peers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;

/// A named, timestamped event.
///
/// Records have no generated id; a queued record is identified by its line
/// in the queue file. Duplicate event names are allowed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event name the peer dispatches on.
    pub event: String,
    /// Opaque payload.
    #[serde(default)]
    pub data: Value,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl EventRecord {
    /// Create a record, stamping it with the current time when `timestamp` is `None`.
    pub fn new(event: impl Into<String>, data: Value, timestamp: Option<i64>) -> Self {
        Self {
            event: event.into(),
            data,
            timestamp: timestamp.unwrap_or_else(now_ms),
        }
    }

    /// Validate an untyped JSON value against the record shape.
    ///
    /// `event` must be a non-empty string and `timestamp` a number.
    /// Fractional timestamps are truncated toward zero. A missing `data`
    /// becomes `null`.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(mut map) = value else {
            return Err(DecodeError::Schema("record is not a JSON object".into()));
        };

        let event = match map.remove("event") {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::String(_)) => {
                return Err(DecodeError::Schema("`event` is empty".into()));
            }
            Some(other) => {
                return Err(DecodeError::Schema(format!(
                    "`event` must be a string, got {}",
                    type_name(&other)
                )));
            }
            None => return Err(DecodeError::Schema("missing field `event`".into())),
        };

        let timestamp = match map.remove("timestamp") {
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    i
                } else {
                    match n.as_f64() {
                        Some(f) if f.is_finite() && f.abs() < i64::MAX as f64 => f.trunc() as i64,
                        _ => {
                            return Err(DecodeError::Schema(format!(
                                "`timestamp` {n} is out of range"
                            )));
                        }
                    }
                }
            }
            Some(other) => {
                return Err(DecodeError::Schema(format!(
                    "`timestamp` must be a number, got {}",
                    type_name(&other)
                )));
            }
            None => return Err(DecodeError::Schema("missing field `timestamp`".into())),
        };

        let data = map.remove("data").unwrap_or(Value::Null);

        Ok(Self {
            event,
            data,
            timestamp,
        })
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
