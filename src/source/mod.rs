//! Event source - notification decoding, file reading and the ingestion loop

pub mod ingestion;
pub mod notification;
pub mod reader;

pub use ingestion::{run_reader, start_ingestion, IngestionStats};
pub use notification::{NotificationError, NotificationParser, ReceiptClock};
pub use reader::TailReader;
