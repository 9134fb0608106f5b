pub mod aggregator_core;
pub mod config;
pub mod sink;
pub mod source;
pub mod sqlite_pragma;
