//! Decoded context-update events and their attributes

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved and companion column names shared by both aggregation strategies
pub mod columns {
    pub const ENTITY_ID: &str = "entityId";
    pub const ENTITY_TYPE: &str = "entityType";
    pub const SERVICE_PATH: &str = "fiwareServicePath";
    pub const RECV_TIME: &str = "recvTime";
    /// Receipt millis in row mode
    pub const RECV_TIME_TS: &str = "recvTimeTs";
    /// Receipt millis in column mode
    pub const RECV_TIME_TS_COLUMN: &str = "recvTimeTsC";

    pub const ATTR_NAME: &str = "attrName";
    pub const ATTR_TYPE: &str = "attrType";
    pub const ATTR_VALUE: &str = "attrValue";
    pub const ATTR_MD: &str = "attrMd";

    pub const METADATA_SUFFIX: &str = "_md";
    pub const TYPE_SUFFIX: &str = "_type";

    /// Column-mode reserved fields, in declaration order
    pub const COLUMN_RESERVED: [&str; 5] = [
        ENTITY_ID,
        ENTITY_TYPE,
        SERVICE_PATH,
        RECV_TIME_TS_COLUMN,
        RECV_TIME,
    ];

    /// Fixed row-mode schema, in declaration order
    pub const ROW_SCHEMA: [&str; 9] = [
        RECV_TIME_TS,
        RECV_TIME,
        SERVICE_PATH,
        ENTITY_ID,
        ENTITY_TYPE,
        ATTR_NAME,
        ATTR_TYPE,
        ATTR_VALUE,
        ATTR_MD,
    ];

    /// Case-insensitive lookup of a column-mode reserved name
    pub fn reserved(name: &str) -> Option<&'static str> {
        COLUMN_RESERVED
            .iter()
            .copied()
            .find(|reserved| reserved.eq_ignore_ascii_case(name))
    }

    pub fn metadata_of(attr_name: &str) -> String {
        format!("{}{}", attr_name, METADATA_SUFFIX)
    }

    pub fn type_of(attr_name: &str) -> String {
        format!("{}{}", attr_name, TYPE_SUFFIX)
    }
}

/// Attribute carrying the entity alteration kind; never persisted as a column
pub const ALTERATION_TYPE: &str = "alterationType";

/// `alterationType` value marking an entity deletion
pub const ENTITY_DELETE: &str = "entityDelete";

pub const TEXT_UNRESTRICTED: &str = "TextUnrestricted";

/// One decoded attribute of a context-update event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: String,
    pub value: Value,
    /// Metadata as a JSON array string, e.g. `[{"name":"unit","type":"Text","value":"C"}]`
    pub metadata_json: String,
}

impl AttributeRecord {
    pub fn new(name: impl Into<String>, attr_type: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            attr_type: attr_type.into(),
            value,
            metadata_json: "[]".to_string(),
        }
    }

    pub fn with_metadata(mut self, metadata_json: impl Into<String>) -> Self {
        self.metadata_json = metadata_json.into();
        self
    }

    pub fn is_alteration_type(&self) -> bool {
        self.name == ALTERATION_TYPE
    }

    /// True for an `alterationType` attribute whose value is `entityDelete`
    pub fn marks_delete(&self) -> bool {
        self.is_alteration_type() && self.value.as_str() == Some(ENTITY_DELETE)
    }
}

/// One context-update notification for a single entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub service: String,
    pub service_path: String,
    pub entity_id: String,
    pub entity_type: String,
    pub received_at_millis: i64,
    pub attributes: Vec<AttributeRecord>,
    pub is_delete_marker: bool,
}

impl EventRecord {
    /// Build an event, deriving the delete marker from its attributes
    pub fn new(
        service: impl Into<String>,
        service_path: impl Into<String>,
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        received_at_millis: i64,
        attributes: Vec<AttributeRecord>,
    ) -> Self {
        let is_delete_marker = attributes.iter().any(AttributeRecord::marks_delete);
        Self {
            service: service.into(),
            service_path: service_path.into(),
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            received_at_millis,
            attributes,
            is_delete_marker,
        }
    }

    pub fn has_attributes(&self) -> bool {
        !self.attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delete_marker_derived_from_alteration_type() {
        let event = EventRecord::new(
            "svc",
            "/",
            "E1",
            "Room",
            100,
            vec![
                AttributeRecord::new("temperature", "Number", json!(21)),
                AttributeRecord::new(ALTERATION_TYPE, "Text", json!(ENTITY_DELETE)),
            ],
        );
        assert!(event.is_delete_marker);

        let update = EventRecord::new(
            "svc",
            "/",
            "E1",
            "Room",
            100,
            vec![AttributeRecord::new(ALTERATION_TYPE, "Text", json!("entityUpdate"))],
        );
        assert!(!update.is_delete_marker);
    }

    #[test]
    fn test_reserved_lookup_is_case_insensitive() {
        assert_eq!(columns::reserved("ENTITYID"), Some(columns::ENTITY_ID));
        assert_eq!(columns::reserved("recvtime"), Some(columns::RECV_TIME));
        assert_eq!(columns::reserved("temperature"), None);
    }
}
