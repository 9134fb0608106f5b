//! Unified writer interface for aggregations
//!
//! Routes writes to either JSONL or SQLite backend based on configuration.

use super::backend::{PersistenceBackend, PersistenceError, StoreOptions};
use super::jsonl_backend::JsonlBackend;
use super::naming::Destination;
use super::sqlite_backend::SqliteBackend;
use crate::aggregator_core::{Aggregation, LastDataSnapshot};
use crate::config::{BackendType, SinkConfig};
use async_trait::async_trait;
use std::path::Path;

/// Unified writer that routes to either JSONL or SQLite backend
pub enum SinkWriter {
    Jsonl(JsonlBackend),
    Sqlite(SqliteBackend),
}

impl SinkWriter {
    /// Create a new writer based on backend type
    pub fn new(backend: BackendType, path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, PersistenceError> {
        match backend {
            BackendType::Jsonl => Ok(SinkWriter::Jsonl(JsonlBackend::new(path, options)?)),
            BackendType::Sqlite => Ok(SinkWriter::Sqlite(SqliteBackend::new(path, options)?)),
        }
    }

    pub fn from_config(config: &SinkConfig) -> Result<Self, PersistenceError> {
        let path = match config.backend {
            BackendType::Jsonl => &config.output_path,
            BackendType::Sqlite => &config.db_path,
        };
        Self::new(config.backend, path, config.store_options())
    }
}

#[async_trait]
impl PersistenceBackend for SinkWriter {
    async fn insert_rows(
        &mut self,
        destination: &Destination,
        aggregation: &Aggregation,
    ) -> Result<usize, PersistenceError> {
        match self {
            SinkWriter::Jsonl(w) => w.insert_rows(destination, aggregation).await,
            SinkWriter::Sqlite(w) => w.insert_rows(destination, aggregation).await,
        }
    }

    async fn upsert_last_data(
        &mut self,
        destination: &Destination,
        snapshot: &LastDataSnapshot,
    ) -> Result<usize, PersistenceError> {
        match self {
            SinkWriter::Jsonl(w) => w.upsert_last_data(destination, snapshot).await,
            SinkWriter::Sqlite(w) => w.upsert_last_data(destination, snapshot).await,
        }
    }

    async fn flush(&mut self) -> Result<(), PersistenceError> {
        match self {
            SinkWriter::Jsonl(w) => w.flush().await,
            SinkWriter::Sqlite(w) => w.flush().await,
        }
    }

    fn backend_type(&self) -> &'static str {
        match self {
            SinkWriter::Jsonl(w) => w.backend_type(),
            SinkWriter::Sqlite(w) => w.backend_type(),
        }
    }
}
