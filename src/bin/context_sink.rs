//! Context Sink - persists context-update notifications
//!
//! Reads notification JSON lines from `SINK_INPUT_PATH`, aggregates them per
//! destination and writes the aggregations to SQLite or JSONL.
//!
//! Usage:
//!   cargo run --release --bin context_sink
//!
//! See `SinkConfig::from_env` for the full list of `SINK_*` variables.

use context_sink::config::SinkConfig;
use context_sink::sink::{BatchDriver, SinkWriter};
use context_sink::source::{run_reader, start_ingestion, NotificationParser, TailReader};
use dotenv::dotenv;
use log::{error, info};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Starting Context Sink...");

    let config = SinkConfig::from_env()?;
    let input_path = config
        .input_path
        .clone()
        .ok_or_else(|| context_sink::config::ConfigError::MissingVariable("SINK_INPUT_PATH".to_string()))?;

    info!("📊 Configuration:");
    info!("   ├─ Input: {} (follow: {})", input_path.display(), config.follow_input);
    info!("   ├─ Backend: {:?}", config.backend);
    info!("   ├─ Attribute persistence: {}", config.attr_persistence.as_str());
    info!("   ├─ Data model: {}", config.data_model.as_str());
    info!(
        "   ├─ Last data: {} ({:?})",
        if config.last_data_enabled { "enabled" } else { "disabled" },
        config.last_data_mode
    );
    info!("   └─ Flush: every {}ms or {} events", config.flush_interval_ms, config.batch_size);

    let writer = SinkWriter::from_config(&config)?;
    let driver = BatchDriver::from_config(&config, writer);

    let mut reader = TailReader::new(input_path, config.follow_input);
    reader.start().await?;
    let parser = NotificationParser::new(
        config.default_service.clone(),
        config.default_service_path.clone(),
    );

    let (tx, rx) = mpsc::channel(config.channel_buffer);
    info!("✅ Event channel created (buffer: {})", config.channel_buffer);

    let reader_task = tokio::spawn(async move {
        if let Err(e) = run_reader(reader, parser, tx).await {
            error!("❌ Notification reader failed: {}", e);
        }
    });

    let mut ingestion_task = tokio::spawn(start_ingestion(
        rx,
        driver,
        config.flush_interval_ms,
        config.batch_size,
    ));

    let stats = tokio::select! {
        finished = &mut ingestion_task => finished?,
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!("❌ Failed to listen for CTRL+C: {}", err);
            }
            info!("⚠️  Received CTRL+C, shutting down...");
            // Dropping the sender closes the channel and triggers the final flush
            reader_task.abort();
            ingestion_task.await?
        }
    };

    info!(
        "✅ Context Sink stopped: {} events, {} rows written, {} failed destinations",
        stats.events, stats.rows_written, stats.failed_destinations
    );
    Ok(())
}
