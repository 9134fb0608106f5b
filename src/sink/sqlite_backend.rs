use super::backend::{storable, PersistenceBackend, PersistenceError, StoreOptions};
use super::naming::Destination;
use crate::aggregator_core::{Aggregation, LastDataSnapshot};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

pub struct SqliteBackend {
    conn: Connection,
    options: StoreOptions,
}

impl SqliteBackend {
    pub fn new(db_path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, PersistenceError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PersistenceError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to create database directory {}: {}", parent.display(), e),
                ))
            })?;
        }

        let conn = Connection::open(db_path)?;

        apply_optimized_pragmas(&conn).map_err(|e| PersistenceError::Transient(e.to_string()))?;

        log::info!("✅ SQLite database initialized with WAL mode");

        Ok(Self { conn, options })
    }

    fn insert_all(&mut self, table: &str, aggregation: &Aggregation, replace: bool) -> Result<usize, PersistenceError> {
        let columns: Vec<&str> = aggregation.columns().collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT {}INTO {} ({}) VALUES ({})",
            if replace { "OR REPLACE " } else { "" },
            quote_ident(table),
            columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
            placeholders.join(", ")
        );

        let native = self.options.attr_native_types;
        let rows = aggregation.row_count();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for i in 0..rows {
                let values = aggregation
                    .row(i)
                    .into_iter()
                    .map(|(_, value)| to_sql_value(&value, native));
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        Ok(rows)
    }

    /// Create `table` for `aggregation` or add the columns it lacks
    fn ensure_table(
        &self,
        table: &str,
        aggregation: &Aggregation,
        unique_key: Option<&[String]>,
    ) -> Result<(), PersistenceError> {
        let column_type = if self.options.attr_native_types { "" } else { " TEXT" };

        let definitions: Vec<String> = aggregation
            .columns()
            .map(|c| format!("{}{}", quote_ident(c), column_type))
            .collect();
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote_ident(table),
                definitions.join(", ")
            ),
            [],
        )?;

        let existing = self.existing_columns(table)?;
        for column in aggregation.columns().filter(|c| !existing.contains(*c)) {
            log::info!("Adding column {} to {}", column, table);
            self.conn.execute(
                &format!(
                    "ALTER TABLE {} ADD COLUMN {}{}",
                    quote_ident(table),
                    quote_ident(column),
                    column_type
                ),
                [],
            )?;
        }

        if let Some(keys) = unique_key {
            self.conn.execute(
                &format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote_ident(&format!("idx_{}_key", table)),
                    quote_ident(table),
                    keys.iter().map(|k| quote_ident(k)).collect::<Vec<_>>().join(", ")
                ),
                [],
            )?;
        }

        Ok(())
    }

    fn existing_columns(&self, table: &str) -> Result<HashSet<String>, PersistenceError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(names)
    }

    fn table_exists(&self, table: &str) -> Result<bool, PersistenceError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn delete_identities(
        &mut self,
        table: &str,
        deleted: &Aggregation,
        keys: &[String],
    ) -> Result<usize, PersistenceError> {
        let condition: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| format!("{} = ?{}", quote_ident(k), i + 1))
            .collect();
        let sql = format!("DELETE FROM {} WHERE {}", quote_ident(table), condition.join(" AND "));

        let native = self.options.attr_native_types;
        let mut removed = 0;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for i in 0..deleted.row_count() {
                let values = keys.iter().map(|k| {
                    deleted
                        .value(k, i)
                        .map(|v| to_sql_value(v, native))
                        .unwrap_or(SqlValue::Null)
                });
                removed += stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        Ok(removed)
    }
}

#[async_trait]
impl PersistenceBackend for SqliteBackend {
    async fn insert_rows(
        &mut self,
        destination: &Destination,
        aggregation: &Aggregation,
    ) -> Result<usize, PersistenceError> {
        let aggregation = storable(aggregation, self.options.attr_metadata_store);
        if aggregation.row_count() == 0 || aggregation.column_count() == 0 {
            return Ok(0);
        }

        let table = destination.qualified_table();
        let written = match self.insert_all(&table, &aggregation, false) {
            Err(e) if e.is_structural() => {
                log::info!("Table {} needs provisioning ({}), retrying", table, e);
                self.ensure_table(&table, &aggregation, None)?;
                self.insert_all(&table, &aggregation, false)?
            }
            other => other?,
        };

        log::debug!("✅ Inserted {} rows into {}", written, table);
        Ok(written)
    }

    async fn upsert_last_data(
        &mut self,
        destination: &Destination,
        snapshot: &LastDataSnapshot,
    ) -> Result<usize, PersistenceError> {
        let table = format!("{}{}", destination.qualified_table(), self.options.last_data_table_suffix);
        let current = storable(&snapshot.current, self.options.attr_metadata_store);

        let mut written = 0;
        if current.row_count() > 0 {
            let keys: Vec<String> = snapshot
                .key_columns
                .iter()
                .filter(|k| current.contains(k))
                .cloned()
                .collect();
            self.ensure_table(&table, &current, Some(&keys))?;
            written += self.insert_all(&table, &current, true)?;
        }

        if snapshot.deleted.row_count() > 0 && self.table_exists(&table)? {
            let removed = self.delete_identities(&table, &snapshot.deleted, &snapshot.key_columns)?;
            log::debug!("Removed {} deleted entities from {}", removed, table);
            written += removed;
        }

        log::debug!("✅ Upserted last data into {}", table);
        Ok(written)
    }

    async fn flush(&mut self) -> Result<(), PersistenceError> {
        // Every write commits its own transaction
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql_value(value: &Value, native: bool) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bool(b) if native => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) if native => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator_core::columns;
    use serde_json::json;
    use tempfile::tempdir;

    fn destination() -> Destination {
        Destination {
            service: "city".to_string(),
            service_path: "/parks".to_string(),
            database: "default".to_string(),
            schema: "city".to_string(),
            table: "parks_E1_Sensor".to_string(),
        }
    }

    fn aggregation(rows: &[(&str, serde_json::Value)]) -> Aggregation {
        let mut agg = Aggregation::new();
        for (i, (entity, temperature)) in rows.iter().enumerate() {
            agg.push(columns::ENTITY_ID, i, json!(entity));
            agg.push("temperature", i, temperature.clone());
            agg.push("temperature_md", i, json!([]));
            agg.push("temperature_type", i, json!("Number"));
        }
        agg
    }

    fn count(db_path: &Path, sql: &str) -> i64 {
        let conn = Connection::open(db_path).unwrap();
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[tokio::test]
    async fn test_insert_creates_table() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("sink.db");
        let mut backend = SqliteBackend::new(&db_path, StoreOptions::default()).unwrap();

        let written = backend
            .insert_rows(&destination(), &aggregation(&[("E1", json!(20)), ("E1", json!(21))]))
            .await
            .unwrap();
        backend.flush().await.unwrap();

        assert_eq!(written, 2);
        assert_eq!(count(&db_path, "SELECT COUNT(*) FROM city_parks_E1_Sensor"), 2);
        assert_eq!(
            count(&db_path, "SELECT COUNT(*) FROM city_parks_E1_Sensor WHERE typeof(temperature) = 'text'"),
            2
        );
    }

    #[tokio::test]
    async fn test_new_columns_are_added() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("sink.db");
        let mut backend = SqliteBackend::new(&db_path, StoreOptions::default()).unwrap();

        backend
            .insert_rows(&destination(), &aggregation(&[("E1", json!(20))]))
            .await
            .unwrap();

        let mut wider = aggregation(&[("E1", json!(22))]);
        wider.push("humidity", 0, json!(40));
        backend.insert_rows(&destination(), &wider).await.unwrap();

        assert_eq!(count(&db_path, "SELECT COUNT(*) FROM city_parks_E1_Sensor"), 2);
        assert_eq!(
            count(&db_path, "SELECT COUNT(*) FROM city_parks_E1_Sensor WHERE humidity IS NULL"),
            1
        );
    }

    #[tokio::test]
    async fn test_native_types_and_metadata_store() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("sink.db");
        let options = StoreOptions {
            attr_native_types: true,
            attr_metadata_store: false,
            ..StoreOptions::default()
        };
        let mut backend = SqliteBackend::new(&db_path, options).unwrap();

        backend
            .insert_rows(&destination(), &aggregation(&[("E1", json!(20)), ("E1", json!(20.5))]))
            .await
            .unwrap();

        assert_eq!(
            count(&db_path, "SELECT COUNT(*) FROM city_parks_E1_Sensor WHERE typeof(temperature) = 'integer'"),
            1
        );
        assert_eq!(
            count(&db_path, "SELECT COUNT(*) FROM city_parks_E1_Sensor WHERE typeof(temperature) = 'real'"),
            1
        );
        assert_eq!(
            count(&db_path, "SELECT COUNT(*) FROM pragma_table_info('city_parks_E1_Sensor') WHERE name = 'temperature_md'"),
            0
        );
    }

    #[tokio::test]
    async fn test_upsert_last_data_replaces_and_deletes() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("sink.db");
        let mut backend = SqliteBackend::new(&db_path, StoreOptions::default()).unwrap();
        let table = "city_parks_E1_Sensor_last_data";

        let first = LastDataSnapshot {
            current: aggregation(&[("E1", json!(20)), ("E2", json!(30))]),
            deleted: Aggregation::new(),
            key_columns: vec![columns::ENTITY_ID.to_string()],
        };
        backend.upsert_last_data(&destination(), &first).await.unwrap();
        assert_eq!(count(&db_path, &format!("SELECT COUNT(*) FROM {}", table)), 2);

        let second = LastDataSnapshot {
            current: aggregation(&[("E1", json!(25))]),
            deleted: aggregation(&[("E2", json!(31))]),
            key_columns: vec![columns::ENTITY_ID.to_string()],
        };
        backend.upsert_last_data(&destination(), &second).await.unwrap();

        assert_eq!(count(&db_path, &format!("SELECT COUNT(*) FROM {}", table)), 1);
        assert_eq!(
            count(&db_path, &format!("SELECT COUNT(*) FROM {} WHERE temperature = '25'", table)),
            1
        );
    }

    #[tokio::test]
    async fn test_wal_checkpoint_configured() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("sink.db");
        let _backend = SqliteBackend::new(&db_path, StoreOptions::default()).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)).unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
    }
}
