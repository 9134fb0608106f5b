//! Typed aggregation outcomes
//!
//! Recoverable conditions travel as `AggregationWarning`s inside an
//! `AggregateReport`; conditions that abort last-data maintenance for an
//! event are returned as `AggregationError`.

use super::last_data::LastDataOutcome;

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationError {
    /// `aggregate` called before `initialize`
    NotInitialized,
    /// The timestamp-key value could not be read as a time instant
    TimestampParse { key: String, value: String },
    /// The event carried no value for the configured timestamp key
    MissingTimestamp { key: String, entity_id: String },
    /// The event carried no value for a configured unique-key column
    MissingUniqueKey { key: String, entity_id: String },
}

impl std::fmt::Display for AggregationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationError::NotInitialized => write!(f, "Aggregator used before initialization"),
            AggregationError::TimestampParse { key, value } => {
                write!(f, "Cannot parse last-data timestamp {}='{}'", key, value)
            }
            AggregationError::MissingTimestamp { key, entity_id } => {
                write!(f, "Missing last-data timestamp '{}' (entity={})", key, entity_id)
            }
            AggregationError::MissingUniqueKey { key, entity_id } => {
                write!(f, "Missing last-data unique key '{}' (entity={})", key, entity_id)
            }
        }
    }
}

impl std::error::Error for AggregationError {}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationWarning {
    /// Event had no attributes; only reserved fields (column mode) or nothing (row mode) was appended
    NoAttributes { entity_id: String },
    /// Geometry could not be reprojected; the original value was kept
    GeometryConversion { attribute: String, reason: String },
    /// Attribute metadata was not valid JSON; kept as raw text
    MalformedMetadata { attribute: String },
}

impl std::fmt::Display for AggregationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationWarning::NoAttributes { entity_id } => {
                write!(f, "No attributes within the notified entity (id={})", entity_id)
            }
            AggregationWarning::GeometryConversion { attribute, reason } => {
                write!(f, "Geometry conversion failed for {}: {}", attribute, reason)
            }
            AggregationWarning::MalformedMetadata { attribute } => {
                write!(f, "Malformed metadata for {}", attribute)
            }
        }
    }
}

/// What a single `aggregate` call did besides appending rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateReport {
    pub rows_appended: usize,
    pub warnings: Vec<AggregationWarning>,
    pub last_data: Option<LastDataOutcome>,
}

impl AggregateReport {
    pub fn warn(&mut self, warning: AggregationWarning) {
        self.warnings.push(warning);
    }
}
