//! Tidings Server
//!
//! Run with: cargo run --bin tidings -- --config ./config.toml
//!
//! Configuration is read from `--config`, else the first of
//! `~/.config/tidings/config.toml`, `/etc/tidings/config.toml` and
//! `./config.toml`, then `TIDINGS_*` environment overrides are applied.
//! `RUST_LOG` overrides the configured log level.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tidings::api::{serve, AppState};
use tidings::config::{Config, LoggingConfig, LookupMode};
use tidings::lookup::{is_valid_topic_key, TopicRegistry};
use tidings::stream::Broker;
use tracing_subscriber::{
    fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

#[derive(Parser)]
#[command(name = "tidings")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time event streaming over SSE and WebSocket")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    config.validate()?;

    init_tracing(&config.logging)?;

    tracing::info!("Starting Tidings v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        history_limit = config.broker.history_limit,
        topic_ttl_secs = config.broker.topic_ttl_secs,
        backpressure = ?config.broker.backpressure,
        "Broker configured"
    );

    let broker = Broker::new(config.broker_config());
    let server_config = config.server_config();

    let state = match config.lookup.mode {
        LookupMode::Open => {
            tracing::info!("Lookup mode: open");
            AppState::new(broker.clone(), server_config.clone())
        }
        LookupMode::Registry => {
            let topics = config.lookup.topics.iter().filter(|key| {
                let valid = is_valid_topic_key(key);
                if !valid {
                    tracing::warn!(topic = %key, "Skipping invalid topic key in config");
                }
                valid
            });
            let registry = Arc::new(TopicRegistry::with_topics(topics.cloned()));
            tracing::info!(topics = registry.len().await, "Lookup mode: registry");
            AppState::with_registry(broker.clone(), registry, server_config.clone())
        }
    };

    serve(state, &server_config).await?;

    broker.stop();
    tracing::info!("Tidings stopped");

    Ok(())
}

/// Install the global subscriber: `pretty` or `json` lines to stdout or
/// to `logging.file`
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tidings={},tower_http=info", logging.level)));

    let writer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = if logging.format == "json" {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(logging.file.is_none())
            .with_writer(writer)
            .boxed()
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
    Ok(())
}
