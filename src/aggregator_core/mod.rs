//! Aggregator Core - schema-on-the-fly aggregation of context updates
//!
//! Turns the events of one destination into a column-aligned `Aggregation`
//! ready for bulk persistence, and optionally maintains a last-data projection
//! (latest row per entity) across flush cycles.
//!
//! # Architecture
//!
//! ```text
//! EventRecord (per destination, in receipt order)
//!     ↓
//! Aggregator::initialize(first event)   → declares base schema
//!     ↓
//! Aggregator::aggregate(event) × N      → RowAggregator | ColumnAggregator
//!     ↓                                       ↓
//! Aggregation (equal-length columns)     LastDataTracker (current / deleted)
//!     ↓
//! PersistenceBackend
//! ```

pub mod aggregation;
pub mod column;
pub mod error;
pub mod geo;
pub mod last_data;
pub mod record;
pub mod registry;
pub mod row;
pub mod strategy;
pub mod timestamp;

pub use aggregation::Aggregation;
pub use column::ColumnAggregator;
pub use error::{AggregateReport, AggregationError, AggregationWarning};
pub use geo::GeoFormat;
pub use last_data::{LastDataOptions, LastDataOutcome, LastDataSnapshot, LastDataTracker};
pub use record::{columns, AttributeRecord, EventRecord};
pub use registry::{LastDataRegistry, SharedTracker};
pub use row::RowAggregator;
pub use strategy::{build_aggregator, Aggregator, AggregatorOptions, AttrPersistence};
