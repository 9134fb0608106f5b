//! JSONL backend - one JSON line per persisted aggregation

use super::backend::{storable, PersistenceBackend, PersistenceError, StoreOptions};
use super::naming::Destination;
use crate::aggregator_core::{Aggregation, LastDataSnapshot};
use async_trait::async_trait;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JsonlRecord<'a> {
    Rows {
        destination: &'a Destination,
        rows: usize,
        aggregation: &'a Aggregation,
    },
    LastData {
        destination: &'a Destination,
        key_columns: &'a [String],
        current: &'a Aggregation,
        deleted: &'a Aggregation,
    },
}

pub struct JsonlBackend {
    writer: BufWriter<std::fs::File>,
    options: StoreOptions,
    last_flush: Instant,
}

impl JsonlBackend {
    pub fn new(output_path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, PersistenceError> {
        let output_path = output_path.as_ref();
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(output_path)?;

        log::info!("📝 Writing aggregations to: {}", output_path.display());

        Ok(Self {
            writer: BufWriter::new(file),
            options,
            last_flush: Instant::now(),
        })
    }

    fn write_record(&mut self, record: &JsonlRecord<'_>) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(record)?;
        writeln!(self.writer, "{}", json)?;

        // Flush every 5 seconds
        if self.last_flush.elapsed() > Duration::from_secs(5) {
            self.writer.flush()?;
            self.last_flush = Instant::now();
        }

        Ok(())
    }
}

impl Drop for JsonlBackend {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[async_trait]
impl PersistenceBackend for JsonlBackend {
    async fn insert_rows(
        &mut self,
        destination: &Destination,
        aggregation: &Aggregation,
    ) -> Result<usize, PersistenceError> {
        let aggregation = storable(aggregation, self.options.attr_metadata_store);
        let rows = aggregation.row_count();
        if rows == 0 {
            return Ok(0);
        }

        self.write_record(&JsonlRecord::Rows {
            destination,
            rows,
            aggregation: &aggregation,
        })?;
        Ok(rows)
    }

    async fn upsert_last_data(
        &mut self,
        destination: &Destination,
        snapshot: &LastDataSnapshot,
    ) -> Result<usize, PersistenceError> {
        let current = storable(&snapshot.current, self.options.attr_metadata_store);
        let deleted = storable(&snapshot.deleted, self.options.attr_metadata_store);
        let rows = current.row_count() + deleted.row_count();
        if rows == 0 {
            return Ok(0);
        }

        self.write_record(&JsonlRecord::LastData {
            destination,
            key_columns: &snapshot.key_columns,
            current: &current,
            deleted: &deleted,
        })?;
        Ok(rows)
    }

    async fn flush(&mut self) -> Result<(), PersistenceError> {
        self.writer.flush()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}
