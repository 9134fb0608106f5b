//! Batch driver - aggregates each destination of a batch and persists it
//!
//! One aggregator per destination per batch. Last-data trackers outlive the
//! batch through the registry, so newer-wins holds across flush cycles. A
//! failing destination is reported and never stops the others.

use super::backend::{PersistenceBackend, PersistenceError};
use super::batch::{DestinationGroup, EventBatch};
use super::naming::{Destination, NamingPolicy};
use crate::aggregator_core::{
    build_aggregator, AggregatorOptions, AttrPersistence, EventRecord, LastDataRegistry,
};
use crate::config::{LastDataMode, SinkConfig};
use std::sync::PoisonError;

/// What happened to one destination of a batch
#[derive(Debug, Clone)]
pub struct DestinationReport {
    pub destination: Destination,
    pub events: usize,
    pub rows_aggregated: usize,
    pub rows_written: usize,
    pub last_data_rows: usize,
    pub warnings: usize,
    /// Events whose last-data update was rejected
    pub last_data_errors: usize,
    pub failure: Option<String>,
}

impl DestinationReport {
    fn new(destination: Destination, events: usize) -> Self {
        Self {
            destination,
            events,
            rows_aggregated: 0,
            rows_written: 0,
            last_data_rows: 0,
            warnings: 0,
            last_data_errors: 0,
            failure: None,
        }
    }

    pub fn persisted(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub destinations: Vec<DestinationReport>,
    /// Events dropped before aggregation (no valid destination)
    pub rejected: usize,
}

impl BatchReport {
    pub fn rows_written(&self) -> usize {
        self.destinations.iter().map(|d| d.rows_written).sum()
    }

    pub fn failed(&self) -> usize {
        self.destinations.iter().filter(|d| !d.persisted()).count()
    }
}

pub struct BatchDriver<B: PersistenceBackend> {
    backend: B,
    naming: NamingPolicy,
    persistence: AttrPersistence,
    options: AggregatorOptions,
    last_data_mode: LastDataMode,
    registry: Option<LastDataRegistry>,
    warned_row_upsert: bool,
}

impl<B: PersistenceBackend> BatchDriver<B> {
    pub fn new(
        backend: B,
        naming: NamingPolicy,
        persistence: AttrPersistence,
        options: AggregatorOptions,
        last_data_mode: LastDataMode,
    ) -> Self {
        let registry = match persistence {
            AttrPersistence::Column => options.last_data.clone().map(LastDataRegistry::new),
            AttrPersistence::Row => None,
        };

        Self {
            backend,
            naming,
            persistence,
            options,
            last_data_mode,
            registry,
            warned_row_upsert: false,
        }
    }

    pub fn from_config(config: &SinkConfig, backend: B) -> Self {
        Self::new(
            backend,
            config.naming_policy(),
            config.attr_persistence,
            config.aggregator_options(),
            config.last_data_mode,
        )
    }

    pub fn naming(&self) -> &NamingPolicy {
        &self.naming
    }

    pub fn registry(&self) -> Option<&LastDataRegistry> {
        self.registry.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Group `events` by destination and persist them
    pub async fn persist_events(&mut self, events: Vec<EventRecord>) -> BatchReport {
        let batch = EventBatch::from_events(events, &self.naming);
        self.persist_batch(batch).await
    }

    pub async fn persist_batch(&mut self, batch: EventBatch) -> BatchReport {
        log::debug!(
            "Persisting {} events ({} rejected) to the {} backend",
            batch.event_count(),
            batch.rejected(),
            self.backend.backend_type()
        );
        let mut report = BatchReport {
            destinations: Vec::new(),
            rejected: batch.rejected(),
        };
        if batch.is_empty() {
            return report;
        }

        for group in batch.into_groups() {
            let destination_report = self.persist_group(group).await;
            if let Some(failure) = &destination_report.failure {
                log::error!(
                    "❌ Failed to persist {}: {}",
                    destination_report.destination.key(),
                    failure
                );
            }
            report.destinations.push(destination_report);
        }

        if let Err(e) = self.backend.flush().await {
            log::error!("❌ Failed to flush {} backend: {}", self.backend.backend_type(), e);
        }

        report
    }

    async fn persist_group(&mut self, group: DestinationGroup) -> DestinationReport {
        let DestinationGroup { destination, events } = group;
        let mut report = DestinationReport::new(destination, events.len());

        let Some(first) = events.first() else {
            return report;
        };

        let tracker = self
            .registry
            .as_ref()
            .map(|registry| registry.tracker_for(&report.destination.key()));
        let mut aggregator = build_aggregator(self.persistence, self.options.clone(), tracker.clone());
        aggregator.initialize(first);

        for event in &events {
            if let Err(e) = aggregator.aggregate(event) {
                if report.last_data_errors == 0 {
                    log::warn!(
                        "⚠️  Last data not updated for {}: {}",
                        report.destination.key(),
                        e
                    );
                }
                report.last_data_errors += 1;
            }
        }

        if let Some(tracker) = &tracker {
            let last_timestamp = tracker.lock().unwrap_or_else(PoisonError::into_inner).last_timestamp();
            log::debug!(
                "Last data for {} accepted up to ts={:?}",
                report.destination.key(),
                last_timestamp
            );
        }

        // The row is appended before last-data maintenance can fail
        report.rows_aggregated = aggregator.result().row_count();
        report.warnings = aggregator.warning_count();

        if report.last_data_errors > 1 {
            log::warn!(
                "⚠️  {} events of {} had no last-data update",
                report.last_data_errors,
                report.destination.key()
            );
        }

        let snapshot = aggregator.last_data();
        let upsert = self.last_data_mode.upserts() && snapshot.is_some();
        let insert = self.last_data_mode.inserts() || !upsert;

        if self.last_data_mode.upserts() && self.persistence == AttrPersistence::Row && !self.warned_row_upsert {
            log::warn!("⚠️  Last-data upsert is not available in row mode, inserting instead");
            self.warned_row_upsert = true;
        }

        let aggregation = aggregator.result();
        let result = async {
            if insert {
                report.rows_written = self
                    .backend
                    .insert_rows(&report.destination, aggregation)
                    .await?;
            }
            if let Some(snapshot) = snapshot.filter(|_| upsert) {
                report.last_data_rows = self
                    .backend
                    .upsert_last_data(&report.destination, &snapshot)
                    .await?;
            }
            Ok::<(), PersistenceError>(())
        }
        .await;

        if let Err(e) = result {
            report.failure = Some(e.to_string());
        } else {
            log::debug!(
                "✅ Persisted {} ({} events, {} rows, {} last-data rows)",
                report.destination.key(),
                report.events,
                report.rows_written,
                report.last_data_rows
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator_core::{columns, Aggregation, AttributeRecord, GeoFormat, LastDataOptions, LastDataSnapshot};
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingBackend {
        inserted: Vec<(String, Aggregation)>,
        upserted: Vec<(String, LastDataSnapshot)>,
        fail_table: Option<String>,
        flushes: usize,
    }

    #[async_trait]
    impl PersistenceBackend for RecordingBackend {
        async fn insert_rows(
            &mut self,
            destination: &Destination,
            aggregation: &Aggregation,
        ) -> Result<usize, PersistenceError> {
            if self.fail_table.as_deref() == Some(destination.table.as_str()) {
                return Err(PersistenceError::Transient("disk full".to_string()));
            }
            self.inserted.push((destination.key(), aggregation.clone()));
            Ok(aggregation.row_count())
        }

        async fn upsert_last_data(
            &mut self,
            destination: &Destination,
            snapshot: &LastDataSnapshot,
        ) -> Result<usize, PersistenceError> {
            self.upserted.push((destination.key(), snapshot.clone()));
            Ok(snapshot.current.row_count())
        }

        async fn flush(&mut self) -> Result<(), PersistenceError> {
            self.flushes += 1;
            Ok(())
        }

        fn backend_type(&self) -> &'static str {
            "Recording"
        }
    }

    fn event(id: &str, ts: i64, temperature: i64) -> EventRecord {
        EventRecord::new(
            "city",
            "/parks",
            id,
            "Sensor",
            ts,
            vec![AttributeRecord::new("temperature", "Number", json!(temperature))],
        )
    }

    fn column_options() -> AggregatorOptions {
        AggregatorOptions {
            last_data: Some(LastDataOptions::default()),
            ..AggregatorOptions::default()
        }
    }

    #[tokio::test]
    async fn test_row_mode_inserts_per_destination() {
        let mut driver = BatchDriver::new(
            RecordingBackend::default(),
            NamingPolicy::default(),
            AttrPersistence::Row,
            AggregatorOptions::default(),
            LastDataMode::Insert,
        );

        let report = driver
            .persist_events(vec![event("A", 1, 20), event("B", 2, 21), event("A", 3, 22)])
            .await;

        assert_eq!(report.destinations.len(), 2);
        assert_eq!(report.rows_written(), 3);
        assert_eq!(report.destinations[0].destination.table, "parks_A_Sensor");
        assert_eq!(report.destinations[0].rows_written, 2);
        assert_eq!(driver.backend().flushes, 1);
        assert!(driver.backend().upserted.is_empty());
    }

    #[tokio::test]
    async fn test_row_mode_upsert_falls_back_to_insert() {
        let mut driver = BatchDriver::new(
            RecordingBackend::default(),
            NamingPolicy::default(),
            AttrPersistence::Row,
            column_options(),
            LastDataMode::Upsert,
        );

        let report = driver.persist_events(vec![event("A", 1, 20)]).await;

        assert_eq!(report.rows_written(), 1);
        assert!(driver.backend().upserted.is_empty());
        assert!(driver.registry().is_none());
    }

    #[tokio::test]
    async fn test_column_mode_upsert_keeps_latest_across_batches() {
        let naming = NamingPolicy {
            data_model: crate::sink::naming::DataModel::ByEntityType,
            ..NamingPolicy::default()
        };
        let mut driver = BatchDriver::new(
            RecordingBackend::default(),
            naming,
            AttrPersistence::Column,
            column_options(),
            LastDataMode::Both,
        );

        driver.persist_events(vec![event("A", 10, 20), event("B", 10, 30)]).await;
        let report = driver.persist_events(vec![event("A", 5, 99), event("A", 20, 25)]).await;

        assert!(report.destinations[0].persisted());
        assert_eq!(driver.backend().inserted.len(), 2);
        assert_eq!(driver.backend().upserted.len(), 2);

        let (_, snapshot) = &driver.backend().upserted[1];
        assert_eq!(snapshot.current.row_count(), 2);
        // Replaced rows move to the end of the projection
        assert_eq!(snapshot.current.get(columns::ENTITY_ID).unwrap(), &[json!("B"), json!("A")]);
        assert_eq!(snapshot.current.get("temperature").unwrap(), &[json!(30), json!(25)]);
        assert_eq!(driver.registry().unwrap().destination_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_destination_does_not_stop_others() {
        let backend = RecordingBackend {
            fail_table: Some("parks_A_Sensor".to_string()),
            ..RecordingBackend::default()
        };
        let mut driver = BatchDriver::new(
            backend,
            NamingPolicy::default(),
            AttrPersistence::Column,
            AggregatorOptions::default(),
            LastDataMode::Insert,
        );

        let report = driver.persist_events(vec![event("A", 1, 20), event("B", 2, 21)]).await;

        assert_eq!(report.failed(), 1);
        assert!(!report.destinations[0].persisted());
        assert!(report.destinations[1].persisted());
        assert_eq!(driver.backend().inserted.len(), 1);
    }

    #[tokio::test]
    async fn test_last_data_errors_are_counted() {
        let options = AggregatorOptions {
            last_data: Some(LastDataOptions::new("entityId", "observedAt")),
            ..AggregatorOptions::default()
        };
        let mut driver = BatchDriver::new(
            RecordingBackend::default(),
            NamingPolicy::default(),
            AttrPersistence::Column,
            options,
            LastDataMode::Insert,
        );

        let report = driver.persist_events(vec![event("A", 1, 20), event("A", 2, 21)]).await;

        assert_eq!(report.destinations[0].last_data_errors, 2);
        assert_eq!(report.destinations[0].rows_aggregated, 2);
        assert_eq!(report.destinations[0].rows_written, 2);
        assert!(report.destinations[0].persisted());
    }

    #[tokio::test]
    async fn test_fully_rejected_batch_skips_backend() {
        let naming = NamingPolicy {
            data_model: crate::sink::naming::DataModel::ByServicePath,
            ..NamingPolicy::default()
        };
        let mut driver = BatchDriver::new(
            RecordingBackend::default(),
            naming,
            AttrPersistence::Column,
            AggregatorOptions::default(),
            LastDataMode::Insert,
        );
        let rooted = EventRecord::new(
            "city",
            "/",
            "A",
            "Sensor",
            1,
            vec![AttributeRecord::new("temperature", "Number", json!(20))],
        );

        let report = driver.persist_events(vec![rooted]).await;

        assert_eq!(report.rejected, 1);
        assert!(report.destinations.is_empty());
        assert_eq!(driver.backend().flushes, 0);
    }

    #[tokio::test]
    async fn test_warnings_survive_last_data_errors() {
        let options = AggregatorOptions {
            last_data: Some(LastDataOptions::new("entityId", "observedAt")),
            geo_format: Some(GeoFormat::Wkt),
            ..AggregatorOptions::default()
        };
        let mut driver = BatchDriver::new(
            RecordingBackend::default(),
            NamingPolicy::default(),
            AttrPersistence::Column,
            options,
            LastDataMode::Insert,
        );
        let located = EventRecord::new(
            "city",
            "/parks",
            "A",
            "Sensor",
            1,
            vec![AttributeRecord::new("location", "geo:point", json!("not a point"))],
        );

        let report = driver.persist_events(vec![located]).await;

        let destination = &report.destinations[0];
        assert_eq!(destination.last_data_errors, 1);
        assert_eq!(destination.rows_aggregated, 1);
        assert_eq!(destination.warnings, 1);
    }
}
