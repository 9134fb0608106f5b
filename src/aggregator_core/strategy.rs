//! Aggregator capability shared by the row and column strategies

use super::aggregation::Aggregation;
use super::column::ColumnAggregator;
use super::error::{AggregateReport, AggregationError};
use super::geo::GeoFormat;
use super::last_data::{LastDataOptions, LastDataSnapshot};
use super::record::EventRecord;
use super::registry::SharedTracker;
use super::row::RowAggregator;
use serde_json::Value;

/// How attributes are laid out in the destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrPersistence {
    /// One row per attribute per event
    Row,
    /// One row per event, one column triple per attribute
    Column,
}

impl AttrPersistence {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttrPersistence::Row => "row",
            AttrPersistence::Column => "column",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "row" => Some(AttrPersistence::Row),
            "column" => Some(AttrPersistence::Column),
            _ => None,
        }
    }
}

/// Settings every aggregator receives explicitly
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorOptions {
    /// Enables last-data maintenance (column mode only)
    pub last_data: Option<LastDataOptions>,
    /// Enables geometry reprojection for geo attributes
    pub geo_format: Option<GeoFormat>,
    /// Render `recvTime` in UTC with a `Z` suffix instead of local time
    pub utc_recv_time: bool,
    /// Quote character escaped in `TextUnrestricted` values
    pub text_quote: char,
    /// Apply `alterationType` filtering and geo reprojection in row mode too
    pub row_attr_filters: bool,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            last_data: None,
            geo_format: None,
            utc_recv_time: true,
            text_quote: '\'',
            row_attr_filters: false,
        }
    }
}

/// One aggregation strategy, fed sequentially for a single destination
pub trait Aggregator: Send {
    /// Declare the base schema from the first event of the destination
    fn initialize(&mut self, first: &EventRecord);

    /// Fold one event into the aggregation
    fn aggregate(&mut self, event: &EventRecord) -> Result<AggregateReport, AggregationError>;

    /// The aggregation built so far
    fn result(&self) -> &Aggregation;

    /// Warnings raised since construction, including those of events whose
    /// last-data update failed
    fn warning_count(&self) -> usize;

    /// Last-data projections, when maintained
    fn last_data(&self) -> Option<LastDataSnapshot> {
        None
    }

    fn strategy(&self) -> AttrPersistence;
}

/// Build the aggregator for `persistence`. The tracker is only used in column mode.
pub fn build_aggregator(
    persistence: AttrPersistence,
    options: AggregatorOptions,
    tracker: Option<SharedTracker>,
) -> Box<dyn Aggregator> {
    match persistence {
        AttrPersistence::Row => Box::new(RowAggregator::new(options)),
        AttrPersistence::Column => Box::new(ColumnAggregator::with_tracker(options, tracker)),
    }
}

/// Escape `quote` inside a `TextUnrestricted` value and re-read it
pub fn escape_text(value: &Value, quote: char) -> Value {
    let doubled: String = [quote, quote].iter().collect();
    match value {
        Value::String(s) => Value::String(s.replace(quote, &doubled)),
        other => {
            let escaped = other.to_string().replace(quote, &doubled);
            serde_json::from_str(&escaped).unwrap_or_else(|_| other.clone())
        }
    }
}

/// Parse attribute metadata text. Empty text means no metadata.
pub fn parse_metadata(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    serde_json::from_str(raw)
}

/// Write `value` at row `n` of `column`, creating and back-filling it as needed.
/// A second write for the same row overwrites the first.
pub(crate) fn set_cell(aggregation: &mut Aggregation, column: &str, n: usize, value: Value) {
    aggregation.declare_backfilled(column, n);
    if let Some(values) = aggregation.get_mut(column) {
        if values.len() < n {
            values.resize(n, Value::Null);
        }
        if values.len() == n {
            values.push(value);
        } else {
            log::debug!("Duplicate value for column {} at row {}, keeping the latest", column, n);
            values[n] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text(&json!("it's"), '\''), json!("it''s"));
        assert_eq!(
            escape_text(&json!({"note": "o'clock"}), '\''),
            json!({"note": "o''clock"})
        );
        assert_eq!(escape_text(&json!(12), '\''), json!(12));
    }

    #[test]
    fn test_parse_metadata() {
        assert_eq!(parse_metadata("").unwrap(), json!([]));
        assert_eq!(
            parse_metadata(r#"[{"name":"unit","type":"Text","value":"C"}]"#).unwrap(),
            json!([{"name": "unit", "type": "Text", "value": "C"}])
        );
        assert!(parse_metadata("[{").is_err());
    }

    #[test]
    fn test_set_cell_overwrites_duplicate_row() {
        let mut agg = Aggregation::new();
        set_cell(&mut agg, "a", 0, json!(1));
        set_cell(&mut agg, "a", 0, json!(2));
        set_cell(&mut agg, "b", 1, json!(3));
        assert_eq!(agg.get("a").unwrap(), &[json!(2)]);
        assert_eq!(agg.get("b").unwrap(), &[Value::Null, json!(3)]);
    }
}
