//! Destination naming: where an event's aggregation is persisted

use crate::aggregator_core::EventRecord;
use serde::Serialize;

const DEFAULT_SERVICE: &str = "default";
const ESCAPED_DEFAULT_SERVICE: &str = "default_service";

/// How events are spread over tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataModel {
    /// One table per service path
    ByServicePath,
    /// One table per entity (id and type)
    ByEntity,
    /// One table per entity type
    ByEntityType,
}

impl DataModel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "dm-by-service-path" => Some(DataModel::ByServicePath),
            "dm-by-entity" => Some(DataModel::ByEntity),
            "dm-by-entity-type" => Some(DataModel::ByEntityType),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataModel::ByServicePath => "dm-by-service-path",
            DataModel::ByEntity => "dm-by-entity",
            DataModel::ByEntityType => "dm-by-entity-type",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    NameTooLong { kind: &'static str, name: String, max: usize },
    RootServicePath,
}

impl std::fmt::Display for NamingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamingError::NameTooLong { kind, name, max } => write!(
                f,
                "Building {} name '{}' and its length is greater than {}",
                kind, name, max
            ),
            NamingError::RootServicePath => write!(
                f,
                "Default service path '/' cannot be used with dm-by-service-path data model"
            ),
        }
    }
}

impl std::error::Error for NamingError {}

/// Resolved target of one aggregation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Destination {
    pub service: String,
    pub service_path: String,
    pub database: String,
    pub schema: String,
    pub table: String,
}

impl Destination {
    /// Grouping key, unique per schema and table
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Flat table name for stores without schemas
    pub fn qualified_table(&self) -> String {
        format!("{}_{}", self.schema, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingPolicy {
    pub data_model: DataModel,
    pub database: String,
    pub enable_lowercase: bool,
    pub max_name_length: usize,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self {
            data_model: DataModel::ByEntity,
            database: "default".to_string(),
            enable_lowercase: false,
            max_name_length: 64,
        }
    }
}

impl NamingPolicy {
    pub fn destination(&self, event: &EventRecord) -> Result<Destination, NamingError> {
        Ok(Destination {
            service: event.service.clone(),
            service_path: event.service_path.clone(),
            database: self.database.clone(),
            schema: self.schema_name(&event.service)?,
            table: self.table_name(&event.service_path, &event.entity_id, &event.entity_type)?,
        })
    }

    pub fn schema_name(&self, service: &str) -> Result<String, NamingError> {
        let name = if service == DEFAULT_SERVICE {
            ESCAPED_DEFAULT_SERVICE.to_string()
        } else {
            self.finish(encode(service))
        };
        self.check_length("schema", name)
    }

    pub fn table_name(
        &self,
        service_path: &str,
        entity_id: &str,
        entity_type: &str,
    ) -> Result<String, NamingError> {
        let path = encode(service_path.strip_prefix('/').unwrap_or(service_path));
        let prefixed = |suffix: String| {
            if path.is_empty() {
                suffix
            } else {
                format!("{}_{}", path, suffix)
            }
        };

        let name = match self.data_model {
            DataModel::ByServicePath => {
                if service_path == "/" {
                    return Err(NamingError::RootServicePath);
                }
                path.clone()
            }
            DataModel::ByEntity => prefixed(format!("{}_{}", encode(entity_id), encode(entity_type))),
            DataModel::ByEntityType => prefixed(encode(entity_type)),
        };

        self.check_length("table", self.finish(name))
    }

    fn finish(&self, name: String) -> String {
        if self.enable_lowercase {
            name.to_lowercase()
        } else {
            name
        }
    }

    fn check_length(&self, kind: &'static str, name: String) -> Result<String, NamingError> {
        if name.len() > self.max_name_length {
            return Err(NamingError::NameTooLong {
                kind,
                name,
                max: self.max_name_length,
            });
        }
        Ok(name)
    }
}

/// Replace every char outside `[A-Za-z0-9_]` with `_`
pub fn encode(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(service: &str, path: &str) -> EventRecord {
        EventRecord::new(service, path, "Room-1", "Room", 0, vec![])
    }

    #[test]
    fn test_by_entity_naming() {
        let policy = NamingPolicy::default();
        let dest = policy.destination(&event("smart.city", "/parks/north")).unwrap();

        assert_eq!(dest.schema, "smart_city");
        assert_eq!(dest.table, "parks_north_Room_1_Room");
        assert_eq!(dest.key(), "smart_city.parks_north_Room_1_Room");
        assert_eq!(dest.qualified_table(), "smart_city_parks_north_Room_1_Room");
    }

    #[test]
    fn test_default_service_and_root_path() {
        let policy = NamingPolicy::default();
        let dest = policy.destination(&event("default", "/")).unwrap();

        assert_eq!(dest.schema, "default_service");
        assert_eq!(dest.table, "Room_1_Room");
    }

    #[test]
    fn test_by_service_path_rejects_root() {
        let policy = NamingPolicy {
            data_model: DataModel::ByServicePath,
            ..NamingPolicy::default()
        };
        assert_eq!(
            policy.destination(&event("city", "/")).unwrap_err(),
            NamingError::RootServicePath
        );
        assert_eq!(policy.destination(&event("city", "/parks")).unwrap().table, "parks");
    }

    #[test]
    fn test_by_entity_type_lowercase() {
        let policy = NamingPolicy {
            data_model: DataModel::ByEntityType,
            enable_lowercase: true,
            ..NamingPolicy::default()
        };
        let dest = policy.destination(&event("City", "/Parks")).unwrap();
        assert_eq!(dest.schema, "city");
        assert_eq!(dest.table, "parks_room");
    }

    #[test]
    fn test_name_too_long() {
        let policy = NamingPolicy {
            max_name_length: 8,
            ..NamingPolicy::default()
        };
        assert!(matches!(
            policy.destination(&event("city", "/a-very-long-service-path")),
            Err(NamingError::NameTooLong { kind: "table", .. })
        ));
    }
}
