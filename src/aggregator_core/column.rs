//! Column-oriented aggregation with dynamic attribute columns
//!
//! One row per event. Each attribute owns three columns: its value, `<name>_md`
//! and `<name>_type`. A column first seen at row `n` is back-filled with `n`
//! nulls, and after every event all columns are padded to the same length.
//! When last-data is enabled the freshly appended row is folded into the
//! destination's `LastDataTracker`.

use super::aggregation::Aggregation;
use super::error::{AggregateReport, AggregationError, AggregationWarning};
use super::geo;
use super::last_data::{LastDataSnapshot, LastDataTracker};
use super::record::{columns, EventRecord, TEXT_UNRESTRICTED};
use super::registry::SharedTracker;
use super::strategy::{escape_text, parse_metadata, set_cell, Aggregator, AggregatorOptions, AttrPersistence};
use super::timestamp::{human_readable, parse_time_instant};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

pub struct ColumnAggregator {
    options: AggregatorOptions,
    aggregation: Aggregation,
    tracker: Option<SharedTracker>,
    initialized: bool,
    warning_count: usize,
}

impl ColumnAggregator {
    /// Aggregator with a private last-data tracker (if last-data is enabled)
    pub fn new(options: AggregatorOptions) -> Self {
        Self::with_tracker(options, None)
    }

    /// Aggregator sharing the given destination tracker
    pub fn with_tracker(options: AggregatorOptions, tracker: Option<SharedTracker>) -> Self {
        let tracker = match (&options.last_data, tracker) {
            (Some(_), Some(shared)) => Some(shared),
            (Some(last_data), None) => Some(Arc::new(Mutex::new(LastDataTracker::new(last_data.clone())))),
            (None, _) => None,
        };

        Self {
            options,
            aggregation: Aggregation::new(),
            tracker,
            initialized: false,
            warning_count: 0,
        }
    }
}

/// Read a timestamp-key attribute value as epoch millis
fn attribute_timestamp(name: &str, value: &Value) -> Result<i64, AggregationError> {
    let parsed = match value {
        Value::String(text) => parse_time_instant(text),
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|f| f as i64)),
        _ => None,
    };
    parsed.ok_or_else(|| AggregationError::TimestampParse {
        key: name.to_string(),
        value: value.to_string(),
    })
}

impl Aggregator for ColumnAggregator {
    fn initialize(&mut self, first: &EventRecord) {
        // Unique-key fields first so the target store sees key columns leading
        if let Some(last_data) = &self.options.last_data {
            for key in &last_data.unique_key {
                if columns::reserved(key).is_none() {
                    self.aggregation.declare(key);
                }
            }
        }

        for reserved in columns::COLUMN_RESERVED {
            self.aggregation.declare(reserved);
        }

        if !first.has_attributes() {
            log::warn!(
                "No attributes within the notified entity, only reserved columns declared (id={}, type={})",
                first.entity_id,
                first.entity_type
            );
        }

        for attr in first.attributes.iter().filter(|a| !a.is_alteration_type()) {
            self.aggregation.declare(&attr.name);
            self.aggregation.declare(&columns::metadata_of(&attr.name));
            self.aggregation.declare(&columns::type_of(&attr.name));
        }

        self.initialized = true;
    }

    fn aggregate(&mut self, event: &EventRecord) -> Result<AggregateReport, AggregationError> {
        if !self.initialized {
            return Err(AggregationError::NotInitialized);
        }

        let n = self.aggregation.column_len(columns::SERVICE_PATH);
        let mut report = AggregateReport::default();
        let mut tracker = self
            .tracker
            .as_ref()
            .map(|t| t.lock().unwrap_or_else(PoisonError::into_inner));

        log::debug!(
            "Processing context element (id={}, type={})",
            event.entity_id,
            event.entity_type
        );

        let recv_time = human_readable(event.received_at_millis, self.options.utc_recv_time);
        let agg = &mut self.aggregation;
        set_cell(agg, columns::RECV_TIME_TS_COLUMN, n, Value::String(event.received_at_millis.to_string()));
        set_cell(agg, columns::RECV_TIME, n, Value::String(recv_time));
        set_cell(agg, columns::SERVICE_PATH, n, Value::String(event.service_path.clone()));
        set_cell(agg, columns::ENTITY_ID, n, Value::String(event.entity_id.clone()));
        set_cell(agg, columns::ENTITY_TYPE, n, Value::String(event.entity_type.clone()));

        if !event.has_attributes() {
            log::warn!(
                "No attributes within the notified entity (id={}, type={})",
                event.entity_id,
                event.entity_type
            );
            report.warn(AggregationWarning::NoAttributes {
                entity_id: event.entity_id.clone(),
            });
        }

        let mut delete = event.is_delete_marker;
        let mut timestamp: Option<Result<i64, AggregationError>> = match tracker.as_deref() {
            Some(t) if t.options().uses_receipt_time() => Some(Ok(event.received_at_millis)),
            _ => None,
        };

        for attr in &event.attributes {
            if attr.is_alteration_type() {
                log::debug!("alterationType={}", attr.value);
                delete |= attr.marks_delete();
                continue;
            }

            if let Some(t) = tracker.as_deref_mut() {
                if t.supplies_timestamp(&attr.name) && timestamp.is_none() {
                    timestamp = Some(attribute_timestamp(&attr.name, &attr.value));
                }
                t.observe_unique_key(&attr.name);
            }

            log::debug!(
                "Processing context attribute (name={}, type={})",
                attr.name,
                attr.attr_type
            );

            let mut value = attr.value.clone();
            match self.options.geo_format {
                Some(format) if geo::is_geo_type(&attr.attr_type) => {
                    match geo::reproject(&value, &attr.attr_type, format) {
                        Ok(location) => {
                            log::debug!("location={}", location);
                            value = location;
                        }
                        Err(e) => {
                            log::error!("Geometry conversion failed (name={}): {}", attr.name, e);
                            report.warn(AggregationWarning::GeometryConversion {
                                attribute: attr.name.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                _ if attr.attr_type == TEXT_UNRESTRICTED => {
                    value = escape_text(&value, self.options.text_quote);
                }
                _ => {}
            }

            let metadata = match parse_metadata(&attr.metadata_json) {
                Ok(metadata) => metadata,
                Err(e) => {
                    log::warn!("Malformed metadata for {} ({}), storing raw text", attr.name, e);
                    report.warn(AggregationWarning::MalformedMetadata {
                        attribute: attr.name.clone(),
                    });
                    Value::String(attr.metadata_json.clone())
                }
            };

            set_cell(agg, &attr.name, n, value);
            set_cell(agg, &columns::metadata_of(&attr.name), n, metadata);
            set_cell(agg, &columns::type_of(&attr.name), n, Value::String(attr.attr_type.clone()));
        }

        agg.pad_to(n + 1);
        report.rows_appended = 1;
        self.warning_count += report.warnings.len();

        if let Some(t) = tracker.as_deref_mut() {
            let ts = match timestamp {
                Some(result) => result?,
                None => {
                    return Err(AggregationError::MissingTimestamp {
                        key: t.options().timestamp_key.clone(),
                        entity_id: event.entity_id.clone(),
                    })
                }
            };
            let row = agg.row(n);
            let identity = t.identity_of(&row, &event.entity_id)?;
            let outcome = t.update(&row, identity, ts, delete);
            log::debug!("Last-data {:?} (id={}, ts={})", outcome, event.entity_id, ts);
            report.last_data = Some(outcome);
        }

        Ok(report)
    }

    fn result(&self) -> &Aggregation {
        &self.aggregation
    }

    fn warning_count(&self) -> usize {
        self.warning_count
    }

    fn last_data(&self) -> Option<LastDataSnapshot> {
        self.tracker
            .as_ref()
            .map(|t| t.lock().unwrap_or_else(PoisonError::into_inner).snapshot())
    }

    fn strategy(&self) -> AttrPersistence {
        AttrPersistence::Column
    }
}
