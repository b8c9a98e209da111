//! Tidings CLI
//!
//! Command-line client for a running Tidings server:
//! - Publish events and manage registered topics
//! - Follow a topic's event stream
//! - Check status

use clap::{Parser, Subcommand};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use std::path::PathBuf;
use tidings::api::dto::{HealthResponse, PublishRequest, TopicResponse};
use tidings::stream::{Event, EventKind};

#[derive(Parser)]
#[command(name = "tidings-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Client for the Tidings event streaming server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Server URL
    #[arg(long, default_value = "http://localhost:8090", global = true)]
    pub api_url: String,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish an event to a topic
    Publish {
        topic: String,
        /// Event type: status, token, progress, final, error
        kind: String,
        /// JSON payload, e.g. '{"phase": "generating"}'
        data: Option<String>,
    },

    /// Register a topic (registry mode)
    Register { topic: String },

    /// Unregister a topic (registry mode)
    Unregister { topic: String },

    /// Follow a topic's event stream until it ends
    Tail {
        topic: String,
        /// Resume after this event id
        #[arg(short, long)]
        last_event_id: Option<String>,
    },

    /// Show server status
    Status,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Publish { topic, kind, data } => {
            let kind: EventKind = match kind.parse() {
                Ok(kind) => kind,
                Err(e) => {
                    eprintln!("{}", e);
                    eprintln!("Valid types: status, token, progress, final, error");
                    std::process::exit(1);
                }
            };
            let data = match data.as_deref() {
                Some(raw) => serde_json::from_str(raw)
                    .map_err(|e| anyhow::anyhow!("Invalid JSON payload: {}", e))?,
                None => serde_json::Value::Null,
            };

            let response = client
                .post(format!("{}/api/v1/topics/{}/events", cli.api_url, encode(&topic)))
                .json(&PublishRequest { kind, data })
                .send()
                .await?;

            if response.status().is_success() {
                let event: Event = response.json().await?;
                match cli.format.as_str() {
                    "json" => println!("{}", serde_json::to_string_pretty(&event)?),
                    _ => println!("Published {} event {} to {}", event.kind, event.id, topic),
                }
            } else {
                return Err(request_failed("Publish failed", response).await);
            }
        }

        Commands::Register { topic } => {
            let response = client
                .put(format!("{}/api/v1/topics/{}", cli.api_url, encode(&topic)))
                .send()
                .await?;

            if response.status().is_success() {
                let result: TopicResponse = response.json().await?;
                if result.created {
                    println!("Registered {}", result.topic);
                } else {
                    println!("{} was already registered", result.topic);
                }
            } else {
                return Err(request_failed("Register failed", response).await);
            }
        }

        Commands::Unregister { topic } => {
            let response = client
                .delete(format!("{}/api/v1/topics/{}", cli.api_url, encode(&topic)))
                .send()
                .await?;

            if response.status().is_success() {
                println!("Unregistered {}", topic);
            } else {
                return Err(request_failed("Unregister failed", response).await);
            }
        }

        Commands::Tail {
            topic,
            last_event_id,
        } => {
            let mut request = client
                .get(format!("{}/api/v1/topics/{}/events", cli.api_url, encode(&topic)))
                .header("Accept", "text/event-stream");
            if let Some(id) = &last_event_id {
                request = request.header("Last-Event-ID", id.as_str());
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(request_failed("Subscribe failed", response).await);
            }

            let mut events = response.bytes_stream().eventsource();
            while let Some(message) = events.next().await {
                let message =
                    message.map_err(|e| anyhow::anyhow!("Event stream failed: {}", e))?;
                print_message(&message, &cli.format);
            }
        }

        Commands::Status => {
            let response = client.get(format!("{}/health", cli.api_url)).send().await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let health: HealthResponse = resp.json().await?;

                    if cli.format == "json" {
                        println!("{}", serde_json::to_string_pretty(&health)?);
                        return Ok(());
                    }

                    println!("Tidings v{}", health.version);
                    println!();
                    println!("Status: {}", health.status);
                    println!("Lookup: {}", health.lookup);
                    println!();
                    println!("Broker:");
                    println!("  Topics:          {}", health.broker.topics);
                    println!("  Subscribers:     {}", health.broker.subscribers);
                    println!("  Retained events: {}", health.broker.retained_events);
                    println!();
                    println!("Uptime: {}", format_duration(health.uptime_seconds));
                }
                Ok(resp) => {
                    eprintln!("Server returned error: {}", resp.status());
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Cannot connect to Tidings at {}", cli.api_url);
                    eprintln!("Error: {}", e);
                    eprintln!();
                    eprintln!("Make sure the server is running:");
                    eprintln!("  cargo run --bin tidings");
                    std::process::exit(1);
                }
            }
        }

        Commands::Config { output } => {
            let config = tidings::config::generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

fn encode(topic: &str) -> String {
    urlencoding::encode(topic).into_owned()
}

async fn request_failed(context: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    anyhow::anyhow!("{} ({}): {}", context, status, text)
}

fn print_message(message: &eventsource_stream::Event, format: &str) {
    if format == "json" {
        println!("{}", message.data);
        return;
    }

    let received = chrono::Local::now().format("%H:%M:%S%.3f");
    match serde_json::from_str::<Event>(&message.data) {
        Ok(event) => println!(
            "{} [{:>4}] {:<8} {}",
            received,
            event.id,
            event.kind.as_str(),
            event.data
        ),
        Err(_) => println!(
            "{} [{:>4}] {}",
            received,
            if message.id.is_empty() { "-" } else { message.id.as_str() },
            message.data
        ),
    }
}

fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}
