//! Sink - destination naming, batching and persistence of aggregations

pub mod backend;
pub mod batch;
pub mod driver;
pub mod jsonl_backend;
pub mod naming;
pub mod sqlite_backend;
pub mod writer;

pub use backend::{PersistenceBackend, PersistenceError, StoreOptions};
pub use batch::{DestinationGroup, EventBatch};
pub use driver::{BatchDriver, BatchReport, DestinationReport};
pub use naming::{DataModel, Destination, NamingError, NamingPolicy};
pub use writer::SinkWriter;
