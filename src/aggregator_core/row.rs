//! Row-oriented aggregation: one fixed-schema row per attribute per event

use super::aggregation::Aggregation;
use super::error::{AggregateReport, AggregationError, AggregationWarning};
use super::geo;
use super::record::{columns, EventRecord};
use super::strategy::{Aggregator, AggregatorOptions, AttrPersistence};
use super::timestamp::human_readable;
use serde_json::Value;

pub struct RowAggregator {
    options: AggregatorOptions,
    aggregation: Aggregation,
    initialized: bool,
    warning_count: usize,
}

impl RowAggregator {
    pub fn new(options: AggregatorOptions) -> Self {
        Self {
            options,
            aggregation: Aggregation::new(),
            initialized: false,
            warning_count: 0,
        }
    }

    fn push(&mut self, column: &str, value: Value) {
        self.aggregation.push(column, 0, value);
    }
}

impl Aggregator for RowAggregator {
    fn initialize(&mut self, _first: &EventRecord) {
        for column in columns::ROW_SCHEMA {
            self.aggregation.declare(column);
        }
        self.initialized = true;
    }

    fn aggregate(&mut self, event: &EventRecord) -> Result<AggregateReport, AggregationError> {
        if !self.initialized {
            return Err(AggregationError::NotInitialized);
        }

        let mut report = AggregateReport::default();

        if !event.has_attributes() {
            log::warn!(
                "No attributes within the notified entity, nothing is done (id={}, type={})",
                event.entity_id,
                event.entity_type
            );
            report.warn(AggregationWarning::NoAttributes {
                entity_id: event.entity_id.clone(),
            });
            self.warning_count += 1;
            return Ok(report);
        }

        log::debug!(
            "Processing context element (id={}, type={})",
            event.entity_id,
            event.entity_type
        );

        let recv_time_ts = event.received_at_millis.to_string();
        let recv_time = human_readable(event.received_at_millis, self.options.utc_recv_time);

        for attr in &event.attributes {
            let mut value = attr.value.clone();

            if self.options.row_attr_filters {
                if attr.is_alteration_type() {
                    continue;
                }
                if let Some(format) = self.options.geo_format.filter(|_| geo::is_geo_type(&attr.attr_type)) {
                    match geo::reproject(&value, &attr.attr_type, format) {
                        Ok(location) => value = location,
                        Err(e) => {
                            log::error!("Geometry conversion failed (name={}): {}", attr.name, e);
                            report.warn(AggregationWarning::GeometryConversion {
                                attribute: attr.name.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }

            self.push(columns::RECV_TIME_TS, Value::String(recv_time_ts.clone()));
            self.push(columns::RECV_TIME, Value::String(recv_time.clone()));
            self.push(columns::SERVICE_PATH, Value::String(event.service_path.clone()));
            self.push(columns::ENTITY_ID, Value::String(event.entity_id.clone()));
            self.push(columns::ENTITY_TYPE, Value::String(event.entity_type.clone()));
            self.push(columns::ATTR_NAME, Value::String(attr.name.clone()));
            self.push(columns::ATTR_TYPE, Value::String(attr.attr_type.clone()));
            self.push(columns::ATTR_VALUE, value);
            self.push(columns::ATTR_MD, Value::String(attr.metadata_json.clone()));
            report.rows_appended += 1;
        }

        self.warning_count += report.warnings.len();
        Ok(report)
    }

    fn result(&self) -> &Aggregation {
        &self.aggregation
    }

    fn warning_count(&self) -> usize {
        self.warning_count
    }

    fn strategy(&self) -> AttrPersistence {
        AttrPersistence::Row
    }
}
