//! Stream MEV dashboard channels to the log.
//!
//! ```bash
//! # Opportunities and notifications against a local backend
//! cargo run --bin mev_stream -- --channel opportunities --channel notifications
//!
//! # Write a sample config
//! cargo run --bin mev_stream -- generate-config --output mev_stream.toml
//! ```

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use mev_realtime::{
    init_logging, ClientConfig, ClientEvent, Filters, LogFormat, RealtimeClient,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "mev_stream")]
#[command(version, about = "MEV dashboard real-time stream client", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "mev_stream.toml")]
    config: String,

    /// Override WebSocket endpoint
    #[arg(long, env = "MEV_WS_URL")]
    url: Option<String>,

    /// Auth token appended to the endpoint
    #[arg(long, env = "MEV_AUTH_TOKEN")]
    token: Option<String>,

    /// Channel to subscribe to (repeatable)
    #[arg(long = "channel", default_values_t = vec!["opportunities".to_string()])]
    channels: Vec<String>,

    /// Filters sent with every subscribe, as a JSON object
    #[arg(long)]
    filters: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Directory for rotated JSON log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Seconds between store summaries (0 to disable)
    #[arg(long, default_value_t = 30)]
    stats_interval: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a sample config file
    GenerateConfig {
        /// Output file path
        #[arg(short, long, default_value = "mev_stream.toml")]
        output: String,
    },
    /// Validate config without connecting
    ValidateConfig,
    /// Connect and stream (default)
    Run,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if it exists (before parsing CLI args)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::GenerateConfig { output }) => {
            generate_sample_config(output)?;
            return Ok(());
        }
        Some(Commands::ValidateConfig) => {
            let config = load_config(&cli)?;
            println!("Configuration is valid:\n{config:#?}");
            return Ok(());
        }
        Some(Commands::Run) | None => {}
    }

    let config = load_config(&cli)?;
    let _guards = init_logging(&config.logging, None)?;

    let filters: Filters = match &cli.filters {
        Some(raw) => serde_json::from_str(raw)?,
        None => Filters::new(),
    };

    info!(url = %config.url, channels = ?cli.channels, "Starting stream");

    let client = RealtimeClient::new(&config);

    client.on_event(|event| match event {
        ClientEvent::StatusChanged { from, to } => info!(%from, %to, "Connection status"),
        ClientEvent::AuthenticationFailed { reason } => error!(%reason, "Authentication failed"),
        ClientEvent::ServerError { message } => warn!(%message, "Server error"),
        ClientEvent::ReconnectExhausted { attempts } => {
            error!(attempts, "Reconnection exhausted; restart or wait for the network")
        }
        other => info!(event = ?other, "Client event"),
    });

    let handles: Vec<_> = cli
        .channels
        .iter()
        .map(|channel| {
            client.subscribe(channel, filters.clone(), |envelope| {
                info!(
                    kind = %envelope.kind,
                    channel = envelope.routing_channel(),
                    data = %envelope.data,
                    "Message"
                );
            })
        })
        .collect();

    client.connect();

    let mut stats = tokio::time::interval(Duration::from_secs(cli.stats_interval.max(1)));
    stats.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = stats.tick(), if cli.stats_interval > 0 => {
                let snapshot = client.snapshot();
                let opportunities = client.opportunities();
                info!(
                    status = %snapshot.status,
                    latency_ms = ?snapshot.latency_ms,
                    live = opportunities.len(),
                    new = opportunities.new_count(),
                    total_seen = opportunities.total_seen(),
                    unread_notifications = client.notifications().unread_count(),
                    "Store summary"
                );
                opportunities.reset_new_count();
            }
        }
    }

    for handle in handles {
        handle.unsubscribe();
    }
    client.shutdown().await;
    Ok(())
}

// ============================================================================
// Config
// ============================================================================

fn load_config(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = ClientConfig::from_toml_file(&cli.config)?;
    config.apply_env();

    if let Some(url) = &cli.url {
        config.url = url.clone();
    }
    if let Some(token) = &cli.token {
        config.auth_token = Some(token.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.parse::<LogFormat>()?;
    }
    if let Some(dir) = &cli.log_dir {
        config.logging.log_dir = Some(dir.clone());
    }
    Ok(config)
}

fn generate_sample_config(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let sample = ClientConfig::default();
    let content = sample.to_toml_string()?;

    let with_comments = format!(
        r#"# MEV stream client configuration
# See: cargo run --bin mev_stream -- --help
#
# Set the auth token via MEV_AUTH_TOKEN rather than in this file.

{content}"#
    );
    std::fs::write(path, with_comments)?;
    println!("Sample config written to {path}");
    Ok(())
}
