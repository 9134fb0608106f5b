//! Persistence backend trait for aggregations
//!
//! A backend receives one destination at a time: the raw aggregation for bulk
//! insertion and, in column mode, the last-data projections for upsert.

use super::naming::Destination;
use crate::aggregator_core::{columns, Aggregation, LastDataSnapshot};
use async_trait::async_trait;

#[derive(Debug)]
pub enum PersistenceError {
    /// Target table or column does not exist or does not match
    Structural(String),
    /// Store-side failure that may succeed on a later attempt
    Transient(String),
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl PersistenceError {
    pub fn is_structural(&self) -> bool {
        matches!(self, PersistenceError::Structural(_))
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        PersistenceError::Io(err)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err)
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        let message = err.to_string();
        if message.contains("no such table") || message.contains("has no column named") {
            PersistenceError::Structural(message)
        } else {
            PersistenceError::Transient(message)
        }
    }
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Structural(e) => write!(f, "Structural error: {}", e),
            PersistenceError::Transient(e) => write!(f, "Database error: {}", e),
            PersistenceError::Io(e) => write!(f, "IO error: {}", e),
            PersistenceError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for PersistenceError {}

/// Store-side settings shared by every backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Keep JSON numbers and booleans as native values instead of text
    pub attr_native_types: bool,
    pub attr_metadata_store: bool,
    pub last_data_table_suffix: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            attr_native_types: false,
            attr_metadata_store: true,
            last_data_table_suffix: "_last_data".to_string(),
        }
    }
}

#[async_trait]
pub trait PersistenceBackend: Send {
    /// Bulk insert every row of `aggregation`, returns rows written
    async fn insert_rows(
        &mut self,
        destination: &Destination,
        aggregation: &Aggregation,
    ) -> Result<usize, PersistenceError>;

    /// Replace the last-data rows of `destination` and drop deleted identities
    async fn upsert_last_data(
        &mut self,
        destination: &Destination,
        snapshot: &LastDataSnapshot,
    ) -> Result<usize, PersistenceError>;

    /// Flush pending writes to storage
    async fn flush(&mut self) -> Result<(), PersistenceError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Columns of `aggregation` that reach the store
///
/// Without metadata storage `attrMd` and the `<attr>_md` companions are
/// dropped. A column ending in `_md` is a companion only when both `<attr>`
/// and `<attr>_type` are columns too.
pub fn storable(aggregation: &Aggregation, metadata_store: bool) -> Aggregation {
    if metadata_store {
        return aggregation.clone();
    }
    aggregation.filtered(|name| name != columns::ATTR_MD && !is_metadata_companion(aggregation, name))
}

fn is_metadata_companion(aggregation: &Aggregation, name: &str) -> bool {
    name.strip_suffix(columns::METADATA_SUFFIX).is_some_and(|attr| {
        aggregation.contains(attr) && aggregation.contains(&columns::type_of(attr))
    })
}
