//! Sink configuration from environment variables
//!
//! All options are read from `SINK_*` variables (a `.env` file is honoured by
//! the binary). Values are validated strictly: a malformed boolean or enum is a
//! configuration error rather than a silent default.

use crate::aggregator_core::{AggregatorOptions, AttrPersistence, GeoFormat, LastDataOptions};
use crate::sink::backend::StoreOptions;
use crate::sink::naming::{DataModel, NamingPolicy};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Jsonl,
    Sqlite,
}

impl BackendType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "jsonl" => Some(BackendType::Jsonl),
            "sqlite" => Some(BackendType::Sqlite),
            _ => None,
        }
    }
}

/// How the last-data projection reaches the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastDataMode {
    /// Bulk insert of the raw aggregation only
    Insert,
    /// Upsert of the last-data projection only
    Upsert,
    Both,
}

impl LastDataMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(LastDataMode::Insert),
            "upsert" => Some(LastDataMode::Upsert),
            "both" => Some(LastDataMode::Both),
            _ => None,
        }
    }

    pub fn inserts(&self) -> bool {
        matches!(self, LastDataMode::Insert | LastDataMode::Both)
    }

    pub fn upserts(&self) -> bool {
        matches!(self, LastDataMode::Upsert | LastDataMode::Both)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    // Runtime
    pub backend: BackendType,
    pub db_path: PathBuf,
    pub output_path: PathBuf,
    pub input_path: Option<PathBuf>,
    pub follow_input: bool,
    pub channel_buffer: usize,
    pub flush_interval_ms: u64,
    /// Buffered events that force a flush before the timer fires
    pub batch_size: usize,

    // Aggregation
    pub attr_persistence: AttrPersistence,
    pub attr_native_types: bool,
    pub attr_metadata_store: bool,
    pub utc_recv_time: bool,
    pub geo_format: Option<GeoFormat>,
    pub text_quote: char,
    pub row_attr_filters: bool,

    // Last data
    pub last_data_enabled: bool,
    pub last_data_mode: LastDataMode,
    pub last_data_table_suffix: String,
    pub last_data_unique_key: String,
    pub last_data_timestamp_key: String,

    // Naming
    pub data_model: DataModel,
    pub database: String,
    pub enable_lowercase: bool,
    pub max_name_length: usize,
    pub default_service: String,
    pub default_service_path: String,
}

impl SinkConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (defaults in parentheses):
    /// - `SINK_BACKEND` sqlite | jsonl (sqlite)
    /// - `SINK_DB_PATH` (data/context_sink.db), `SINK_OUTPUT_PATH` (data/aggregations.jsonl)
    /// - `SINK_INPUT_PATH` notification JSONL file, `SINK_FOLLOW` tail it (false)
    /// - `SINK_CHANNEL_BUFFER` (10000), `SINK_FLUSH_INTERVAL_MS` (5000), `SINK_BATCH_SIZE` (100)
    /// - `SINK_ATTR_PERSISTENCE` row | column (row)
    /// - `SINK_ATTR_NATIVE_TYPES` (false), `SINK_ATTR_METADATA_STORE` (true)
    /// - `SINK_UTC_RECV_TIME` (true)
    /// - `SINK_GEO_PARSE` none | wkt | postgis | oracle (none), `SINK_ORACLE_LOCATOR` (false)
    /// - `SINK_TEXT_QUOTE` (') , `SINK_ROW_ATTR_FILTERS` (false)
    /// - `SINK_LAST_DATA_ENABLED` (false), `SINK_LAST_DATA_MODE` insert | upsert | both (insert)
    /// - `SINK_LAST_DATA_TABLE_SUFFIX` (_last_data), `SINK_LAST_DATA_UNIQUE_KEY` (entityId)
    /// - `SINK_LAST_DATA_TIMESTAMP_KEY` (recvTime)
    /// - `SINK_DATA_MODEL` dm-by-service-path | dm-by-entity | dm-by-entity-type (dm-by-entity)
    /// - `SINK_DATABASE` (default), `SINK_ENABLE_LOWERCASE` (false), `SINK_MAX_NAME_LENGTH` (64)
    /// - `SINK_DEFAULT_SERVICE` (default), `SINK_DEFAULT_SERVICE_PATH` (/)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let backend_str = string("SINK_BACKEND", "sqlite");
        let backend = BackendType::from_str(&backend_str).ok_or_else(|| {
            ConfigError::InvalidValue(format!("SINK_BACKEND={} -- Must be 'sqlite' or 'jsonl'", backend_str))
        })?;

        let persistence_str = string("SINK_ATTR_PERSISTENCE", "row");
        let attr_persistence = AttrPersistence::from_str(&persistence_str).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "SINK_ATTR_PERSISTENCE={} -- Must be 'row' or 'column'",
                persistence_str
            ))
        })?;

        let mode_str = string("SINK_LAST_DATA_MODE", "insert");
        let last_data_mode = LastDataMode::from_str(&mode_str).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "SINK_LAST_DATA_MODE={} -- Must be 'upsert', 'insert' or 'both'",
                mode_str
            ))
        })?;

        let model_str = string("SINK_DATA_MODEL", "dm-by-entity");
        let data_model = DataModel::from_str(&model_str).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "SINK_DATA_MODEL={} -- Must be 'dm-by-service-path', 'dm-by-entity' or 'dm-by-entity-type'",
                model_str
            ))
        })?;

        let oracle_locator = parse_bool(&lookup, "SINK_ORACLE_LOCATOR", false)?;
        let geo_str = string("SINK_GEO_PARSE", "none");
        let geo_format = match geo_str.as_str() {
            "none" => None,
            other => Some(GeoFormat::from_str(other, oracle_locator).ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "SINK_GEO_PARSE={} -- Must be 'none', 'wkt', 'postgis' or 'oracle'",
                    other
                ))
            })?),
        };

        let quote_str = string("SINK_TEXT_QUOTE", "'");
        let mut quote_chars = quote_str.chars();
        let text_quote = match (quote_chars.next(), quote_chars.next()) {
            (Some(c), None) => c,
            _ => {
                return Err(ConfigError::InvalidValue(format!(
                    "SINK_TEXT_QUOTE={} -- Must be a single character",
                    quote_str
                )))
            }
        };

        let last_data_unique_key = string("SINK_LAST_DATA_UNIQUE_KEY", "entityId");
        if last_data_unique_key.split(',').all(|k| k.trim().is_empty()) {
            return Err(ConfigError::InvalidValue(
                "SINK_LAST_DATA_UNIQUE_KEY cannot be empty".to_string(),
            ));
        }

        let config = Self {
            backend,
            db_path: PathBuf::from(string("SINK_DB_PATH", "data/context_sink.db")),
            output_path: PathBuf::from(string("SINK_OUTPUT_PATH", "data/aggregations.jsonl")),
            input_path: lookup("SINK_INPUT_PATH").map(PathBuf::from),
            follow_input: parse_bool(&lookup, "SINK_FOLLOW", false)?,
            channel_buffer: parse_number(&lookup, "SINK_CHANNEL_BUFFER", 10_000)?,
            flush_interval_ms: parse_number(&lookup, "SINK_FLUSH_INTERVAL_MS", 5_000)?,
            batch_size: parse_number(&lookup, "SINK_BATCH_SIZE", 100)?,
            attr_persistence,
            attr_native_types: parse_bool(&lookup, "SINK_ATTR_NATIVE_TYPES", false)?,
            attr_metadata_store: parse_bool(&lookup, "SINK_ATTR_METADATA_STORE", true)?,
            utc_recv_time: parse_bool(&lookup, "SINK_UTC_RECV_TIME", true)?,
            geo_format,
            text_quote,
            row_attr_filters: parse_bool(&lookup, "SINK_ROW_ATTR_FILTERS", false)?,
            last_data_enabled: parse_bool(&lookup, "SINK_LAST_DATA_ENABLED", false)?,
            last_data_mode,
            last_data_table_suffix: string("SINK_LAST_DATA_TABLE_SUFFIX", "_last_data"),
            last_data_unique_key,
            last_data_timestamp_key: string("SINK_LAST_DATA_TIMESTAMP_KEY", "recvTime"),
            data_model,
            database: string("SINK_DATABASE", "default"),
            enable_lowercase: parse_bool(&lookup, "SINK_ENABLE_LOWERCASE", false)?,
            max_name_length: parse_number(&lookup, "SINK_MAX_NAME_LENGTH", 64)?,
            default_service: string("SINK_DEFAULT_SERVICE", "default"),
            default_service_path: string("SINK_DEFAULT_SERVICE_PATH", "/"),
        };

        if config.batch_size == 0 || config.flush_interval_ms == 0 || config.channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "SINK_BATCH_SIZE, SINK_FLUSH_INTERVAL_MS and SINK_CHANNEL_BUFFER must be positive".to_string(),
            ));
        }

        if config.last_data_enabled && config.attr_persistence == AttrPersistence::Row {
            log::warn!("Last-data is only maintained in column mode; ignored for row persistence");
        }

        Ok(config)
    }

    pub fn last_data_options(&self) -> LastDataOptions {
        LastDataOptions::new(&self.last_data_unique_key, &self.last_data_timestamp_key)
    }

    /// Options handed to every aggregator built from this configuration
    pub fn aggregator_options(&self) -> AggregatorOptions {
        AggregatorOptions {
            last_data: self.last_data_enabled.then(|| self.last_data_options()),
            geo_format: self.geo_format,
            utc_recv_time: self.utc_recv_time,
            text_quote: self.text_quote,
            row_attr_filters: self.row_attr_filters,
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            attr_native_types: self.attr_native_types,
            attr_metadata_store: self.attr_metadata_store,
            last_data_table_suffix: self.last_data_table_suffix.clone(),
        }
    }

    pub fn naming_policy(&self) -> NamingPolicy {
        NamingPolicy {
            data_model: self.data_model,
            database: self.database.clone(),
            enable_lowercase: self.enable_lowercase,
            max_name_length: self.max_name_length,
        }
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref() {
        None => Ok(default),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue(format!(
            "{}={} -- Must be 'true' or 'false'",
            key, other
        ))),
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={} -- Must be a number", key, raw))),
    }
}
