//! Ingestion - notification lines in, persisted batches out
//!
//! Two tasks joined by a bounded mpsc channel:
//! 1. `run_reader` decodes notification lines into events and sends them
//! 2. `start_ingestion` buffers events and hands them to the `BatchDriver`
//!    when the flush timer fires or the buffer reaches `batch_size`
//!
//! When the channel closes the remaining buffer is flushed before returning.

use super::notification::NotificationParser;
use super::reader::TailReader;
use crate::aggregator_core::EventRecord;
use crate::sink::{BatchDriver, PersistenceBackend};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub events: usize,
    pub batches: usize,
    pub rows_written: usize,
    pub failed_destinations: usize,
    pub rejected_events: usize,
}

/// Read notifications until end of input (or forever when following)
///
/// Undecodable lines are logged and skipped. Returns the number of events sent.
pub async fn run_reader(
    mut reader: TailReader,
    mut parser: NotificationParser,
    tx: mpsc::Sender<EventRecord>,
) -> std::io::Result<usize> {
    let mut sent = 0usize;
    let mut skipped = 0usize;

    while let Some(line) = reader.read_line().await? {
        let events = match parser.parse_line(&line) {
            Ok(events) => events,
            Err(e) => {
                skipped += 1;
                log::warn!("⚠️  Skipping notification: {}", e);
                continue;
            }
        };

        for event in events {
            if tx.send(event).await.is_err() {
                log::warn!("⚠️  Ingestion channel closed, stopping reader");
                return Ok(sent);
            }
            sent += 1;
        }
    }

    log::info!("📖 End of notifications: {} events sent, {} lines skipped", sent, skipped);
    Ok(sent)
}

/// Buffer events from `rx` and persist them in batches
pub async fn start_ingestion<B: PersistenceBackend>(
    mut rx: mpsc::Receiver<EventRecord>,
    mut driver: BatchDriver<B>,
    flush_interval_ms: u64,
    batch_size: usize,
) -> IngestionStats {
    log::info!("🚀 Starting ingestion");
    log::info!("   ├─ Flush interval: {}ms", flush_interval_ms);
    log::info!("   └─ Batch size: {}", batch_size);

    let period = Duration::from_millis(flush_interval_ms);
    let mut flush_timer = interval_at(Instant::now() + period, period);
    let mut buffer: Vec<EventRecord> = Vec::with_capacity(batch_size);
    let mut stats = IngestionStats::default();

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(event) => {
                        buffer.push(event);
                        stats.events += 1;
                        if buffer.len() >= batch_size {
                            flush(&mut driver, &mut buffer, &mut stats).await;
                        }
                    }
                    None => {
                        log::info!("Ingestion channel closed, final flush");
                        flush(&mut driver, &mut buffer, &mut stats).await;
                        break;
                    }
                }
            }

            _ = flush_timer.tick() => {
                flush(&mut driver, &mut buffer, &mut stats).await;
            }
        }
    }

    log::info!(
        "✅ Ingestion finished: {} events, {} batches, {} rows, {} failed destinations",
        stats.events,
        stats.batches,
        stats.rows_written,
        stats.failed_destinations
    );
    stats
}

async fn flush<B: PersistenceBackend>(
    driver: &mut BatchDriver<B>,
    buffer: &mut Vec<EventRecord>,
    stats: &mut IngestionStats,
) {
    if buffer.is_empty() {
        return;
    }

    let flush_start = std::time::Instant::now();
    let events = std::mem::take(buffer);
    let count = events.len();
    let report = driver.persist_events(events).await;

    stats.batches += 1;
    stats.rows_written += report.rows_written();
    stats.failed_destinations += report.failed();
    stats.rejected_events += report.rejected;

    log::info!(
        "📊 Flush complete: {} events, {} destinations, {} rows | {}ms",
        count,
        report.destinations.len(),
        report.rows_written(),
        flush_start.elapsed().as_millis()
    );

    if report.failed() > 0 {
        log::warn!("⚠️  {} destinations failed to persist", report.failed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator_core::{AggregatorOptions, AttrPersistence, AttributeRecord};
    use crate::config::LastDataMode;
    use crate::sink::jsonl_backend::JsonlBackend;
    use crate::sink::{NamingPolicy, StoreOptions};
    use serde_json::json;
    use std::path::Path;

    fn driver(path: &Path) -> BatchDriver<JsonlBackend> {
        BatchDriver::new(
            JsonlBackend::new(path, StoreOptions::default()).unwrap(),
            NamingPolicy::default(),
            AttrPersistence::Row,
            AggregatorOptions::default(),
            LastDataMode::Insert,
        )
    }

    fn event(id: &str, ts: i64) -> EventRecord {
        EventRecord::new(
            "city",
            "/",
            id,
            "Sensor",
            ts,
            vec![AttributeRecord::new("temperature", "Number", json!(20))],
        )
    }

    #[tokio::test]
    async fn test_flush_at_batch_size_and_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(16);
        for i in 0..5 {
            tx.send(event("E1", i)).await.unwrap();
        }
        drop(tx);

        let stats = start_ingestion(rx, driver(&dir.path().join("out.jsonl")), 60_000, 2).await;

        assert_eq!(stats.events, 5);
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.rows_written, 5);
        assert_eq!(stats.failed_destinations, 0);
    }

    #[tokio::test]
    async fn test_timer_flush_before_close() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.jsonl");
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(start_ingestion(rx, driver(&out), 50, 100));

        tx.send(event("E1", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let content = std::fs::read_to_string(&out).unwrap();
        assert_eq!(content.lines().count(), 1);

        drop(tx);
        let stats = handle.await.unwrap();
        assert_eq!(stats.batches, 1);
    }

    #[tokio::test]
    async fn test_reader_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notifications.jsonl");
        std::fs::write(
            &input,
            concat!(
                r#"{"service":"city","servicePath":"/","receivedAtMillis":1,"data":[{"id":"E1","type":"Sensor","t":1},{"id":"E2","type":"Sensor","t":2}]}"#,
                "\n",
                "not json\n",
                r#"{"service":"city","servicePath":"/","receivedAtMillis":2,"data":[{"id":"E1","type":"Sensor","t":3}]}"#,
                "\n"
            ),
        )
        .unwrap();

        let mut reader = TailReader::new(input, false);
        reader.start().await.unwrap();
        let (tx, mut rx) = mpsc::channel(16);

        let sent = run_reader(reader, NotificationParser::new("default", "/"), tx).await.unwrap();
        assert_eq!(sent, 3);

        let mut ids = Vec::new();
        while let Some(event) = rx.recv().await {
            ids.push(event.entity_id);
        }
        assert_eq!(ids, vec!["E1", "E2", "E1"]);
    }
}
