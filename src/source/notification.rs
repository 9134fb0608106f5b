//! Notification decoding: one JSON line in, one `EventRecord` per entity out
//!
//! ```text
//! {"service":"city","servicePath":"/parks","receivedAtMillis":1700000000000,
//!  "data":[{"id":"E1","type":"Sensor","temperature":{"type":"Number","value":21.5,
//!           "metadata":{"unit":{"type":"Text","value":"C"}}}}]}
//! ```
//!
//! Attribute order follows the notification. Plain (untyped) attribute values
//! get an inferred type.

use crate::aggregator_core::{AttributeRecord, EventRecord};
use serde::Deserialize;
use serde_json::{json, Map, Value};

const ENTITY_ID_KEY: &str = "id";
const ENTITY_TYPE_KEY: &str = "type";

#[derive(Debug)]
pub enum NotificationError {
    Json(serde_json::Error),
    Malformed(String),
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Json(err)
    }
}

impl std::fmt::Display for NotificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationError::Json(e) => write!(f, "Invalid notification JSON: {}", e),
            NotificationError::Malformed(msg) => write!(f, "Malformed notification: {}", msg),
        }
    }
}

impl std::error::Error for NotificationError {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    service: Option<String>,
    service_path: Option<String>,
    received_at_millis: Option<i64>,
    #[serde(default)]
    data: Vec<Map<String, Value>>,
}

/// Wall clock that never goes backwards and never repeats
#[derive(Debug, Default)]
pub struct ReceiptClock {
    last: i64,
}

impl ReceiptClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_millis(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.last = now.max(self.last + 1);
        self.last
    }
}

pub struct NotificationParser {
    default_service: String,
    default_service_path: String,
    clock: ReceiptClock,
}

impl NotificationParser {
    pub fn new(default_service: impl Into<String>, default_service_path: impl Into<String>) -> Self {
        Self {
            default_service: default_service.into(),
            default_service_path: default_service_path.into(),
            clock: ReceiptClock::new(),
        }
    }

    pub fn parse_line(&mut self, line: &str) -> Result<Vec<EventRecord>, NotificationError> {
        let notification: Notification = serde_json::from_str(line)?;

        let service = notification
            .service
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.default_service.clone());
        let service_path = notification
            .service_path
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.default_service_path.clone());
        if !service_path.starts_with('/') {
            return Err(NotificationError::Malformed(format!(
                "service path '{}' must start with '/'",
                service_path
            )));
        }

        let received_at = match notification.received_at_millis {
            Some(millis) => millis,
            None => self.clock.now_millis(),
        };

        notification
            .data
            .into_iter()
            .map(|entity| entity_event(&service, &service_path, received_at, entity))
            .collect()
    }
}

fn entity_event(
    service: &str,
    service_path: &str,
    received_at: i64,
    entity: Map<String, Value>,
) -> Result<EventRecord, NotificationError> {
    let entity_id = match entity.get(ENTITY_ID_KEY) {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        _ => return Err(NotificationError::Malformed("entity without id".to_string())),
    };
    let entity_type = entity
        .get(ENTITY_TYPE_KEY)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let attributes = entity
        .into_iter()
        .filter(|(name, _)| name != ENTITY_ID_KEY && name != ENTITY_TYPE_KEY)
        .map(|(name, raw)| attribute(name, raw))
        .collect();

    Ok(EventRecord::new(
        service,
        service_path,
        entity_id,
        entity_type,
        received_at,
        attributes,
    ))
}

fn attribute(name: String, raw: Value) -> AttributeRecord {
    match raw {
        Value::Object(mut fields) if fields.contains_key("value") || fields.contains_key("type") => {
            let value = fields.remove("value").unwrap_or(Value::Null);
            let attr_type = match fields.remove("type") {
                Some(Value::String(t)) => t,
                _ => inferred_type(&value).to_string(),
            };
            let metadata = fields.remove("metadata").map(metadata_json).unwrap_or_else(|| "[]".to_string());
            AttributeRecord::new(name, attr_type, value).with_metadata(metadata)
        }
        plain => {
            let attr_type = inferred_type(&plain);
            AttributeRecord::new(name, attr_type, plain).with_metadata("[]")
        }
    }
}

/// Flatten `{"unit":{"type":..,"value":..}}` into `[{"name":"unit","type":..,"value":..}]`
fn metadata_json(metadata: Value) -> String {
    let list = match metadata {
        Value::Object(entries) => Value::Array(
            entries
                .into_iter()
                .map(|(name, md)| {
                    let md_type = md.get("type").cloned().unwrap_or(Value::Null);
                    let md_value = md.get("value").cloned().unwrap_or(md);
                    json!({"name": name, "type": md_type, "value": md_value})
                })
                .collect(),
        ),
        other => other,
    };
    list.to_string()
}

fn inferred_type(value: &Value) -> &'static str {
    match value {
        Value::Number(_) => "Number",
        Value::String(_) => "Text",
        Value::Bool(_) => "Boolean",
        Value::Null => "None",
        Value::Array(_) | Value::Object(_) => "StructuredValue",
    }
}
