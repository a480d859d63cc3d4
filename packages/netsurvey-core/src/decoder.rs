//! Decoding of raw query responses into typed update records.
//!
//! Responses are trusted only as far as their shape can be checked. A
//! response without a `notification` list is structurally invalid and
//! decodes to `None`; malformed pieces inside an otherwise valid response are
//! dropped with a warning so the rest still decodes.

use serde::Serialize;
use serde_json::Value;

/// One (path, value) pair reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateRecord {
    pub path: String,
    pub value: Value,
    pub timestamp: Option<i64>,
}

impl UpdateRecord {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Notification {
    pub updates: Vec<UpdateRecord>,
    pub timestamp: Option<i64>,
    pub prefix: Option<String>,
}

impl Notification {
    pub fn has_data(&self) -> bool {
        !self.updates.is_empty()
    }

    pub fn update_count(&self) -> usize {
        self.updates.len()
    }
}

/// A structurally valid response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedResponse {
    pub notifications: Vec<Notification>,
}

impl ParsedResponse {
    /// True when at least one notification carries updates.
    pub fn has_data(&self) -> bool {
        self.notifications.iter().any(Notification::has_data)
    }

    pub fn total_updates(&self) -> usize {
        self.notifications.iter().map(Notification::update_count).sum()
    }

    pub fn first_notification(&self) -> Option<&Notification> {
        self.notifications.first()
    }

    /// All updates across notifications, in response order.
    pub fn into_records(self) -> Vec<UpdateRecord> {
        self.notifications
            .into_iter()
            .flat_map(|n| n.updates)
            .collect()
    }
}

/// Decode a raw response. Returns `None` when the top-level shape is wrong.
pub fn decode(raw: &Value) -> Option<ParsedResponse> {
    let Some(object) = raw.as_object() else {
        tracing::warn!("Query response is not an object");
        return None;
    };

    let Some(field) = object.get("notification") else {
        tracing::debug!("Query response missing 'notification' field");
        return None;
    };

    let Some(raw_notifications) = field.as_array() else {
        tracing::warn!("Query response 'notification' field is not a list");
        return None;
    };

    let notifications: Vec<Notification> = raw_notifications
        .iter()
        .filter_map(decode_notification)
        .collect();

    let parsed = ParsedResponse { notifications };
    tracing::debug!(
        "Decoded response: {} notifications, {} updates",
        parsed.notifications.len(),
        parsed.total_updates()
    );
    Some(parsed)
}

fn decode_notification(raw: &Value) -> Option<Notification> {
    let Some(object) = raw.as_object() else {
        tracing::warn!("Notification is not an object, skipping");
        return None;
    };

    let raw_updates = match object.get("update") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Array(updates)) => updates.as_slice(),
        Some(_) => {
            tracing::warn!("Notification 'update' field is not a list, skipping");
            return None;
        }
    };

    let timestamp = match object.get("timestamp") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let coerced = coerce_timestamp(value);
            if coerced.is_none() {
                tracing::warn!("Invalid notification timestamp {}, ignoring", value);
            }
            coerced
        }
    };

    let prefix = match object.get("prefix") {
        None | Some(Value::Null) => None,
        Some(Value::String(prefix)) => Some(prefix.clone()),
        Some(other) => Some(other.to_string()),
    };

    let updates = raw_updates
        .iter()
        .filter_map(|update| decode_update(update, timestamp))
        .collect();

    Some(Notification {
        updates,
        timestamp,
        prefix,
    })
}

fn decode_update(raw: &Value, timestamp: Option<i64>) -> Option<UpdateRecord> {
    let Some(object) = raw.as_object() else {
        tracing::warn!("Update entry is not an object, skipping");
        return None;
    };

    let path = match object.get("path") {
        Some(Value::String(path)) => path.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    Some(UpdateRecord {
        path,
        value: object.get("val").cloned().unwrap_or(Value::Null),
        timestamp,
    })
}

/// Integers pass through, floats are truncated, anything else is rejected.
fn coerce_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        _ => None,
    }
}
