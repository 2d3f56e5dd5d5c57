//! Structured logging setup.
//!
//! All client components log through `tracing` with a component target so
//! they can be filtered independently:
//!
//! | Target | Description |
//! |--------|-------------|
//! | `mev_realtime::ws` | Connection lifecycle, subscribe/unsubscribe |
//! | `mev_realtime::heartbeat` | Liveness probes and missed replies |
//! | `mev_realtime::reconnect` | Reconnection scheduling and exhaustion |
//! | `mev_realtime::dispatch` | Envelope routing and consumer failures |
//! | `mev_realtime::store` | Store inserts, updates and expiry |
//!
//! ```bash
//! # Trace routing only
//! RUST_LOG=warn,mev_realtime::dispatch=trace cargo run --bin mev_stream
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::{prelude::*, Error};

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable format with colors (default for development)
    #[default]
    Pretty,
    /// JSON format (best for log aggregation)
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(Error::Config(format!(
                "Unknown log format '{other}'. Use: pretty, json, compact"
            ))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,

    /// Format for stdout logging
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for a daily-rotated JSON log file (disabled when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// File name prefix inside `log_dir`
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "mev-realtime.log".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            log_dir: None,
            file_prefix: default_file_prefix(),
        }
    }
}

impl LogConfig {
    /// JSON to stdout plus rotated files, for deployments.
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            format: LogFormat::Json,
            log_dir: Some(log_dir),
            ..Default::default()
        }
    }
}

fn base_filter(config: &LogConfig, env_filter_override: Option<&str>) -> EnvFilter {
    if let Some(filter) = env_filter_override {
        return EnvFilter::new(filter);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(&config.level);
        for directive in ["hyper=warn", "rustls=warn", "tokio_tungstenite=warn", "tungstenite=warn"] {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        filter
    })
}

/// Initialize the global subscriber.
///
/// Returns the `WorkerGuard`s of any file writers; keep them alive for the
/// lifetime of the program or buffered lines are lost.
pub fn init_logging(
    config: &LogConfig,
    env_filter_override: Option<&str>,
) -> Result<Vec<WorkerGuard>> {
    let mut guards = Vec::new();
    let filter = base_filter(config, env_filter_override);

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .json()
                    .with_filter(base_filter(config, env_filter_override)),
            )
        }
        None => None,
    };

    let stdout_layer = match config.format {
        LogFormat::Json => fmt::layer().json().with_filter(filter).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_filter(filter).boxed(),
        LogFormat::Pretty => fmt::layer().with_target(false).with_filter(filter).boxed(),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {e}")))?;

    if let Some(dir) = &config.log_dir {
        eprintln!("File logging enabled: {}", dir.display());
    }
    Ok(guards)
}

/// Log target constants for component-specific logging.
///
/// ```ignore
/// tracing::debug!(target: targets::STORE, id = %id, "Opportunity inserted");
/// ```
pub mod targets {
    /// Connection lifecycle and control messages
    pub const WS: &str = "mev_realtime::ws";
    /// Liveness probes
    pub const HEARTBEAT: &str = "mev_realtime::heartbeat";
    /// Reconnection scheduling
    pub const RECONNECT: &str = "mev_realtime::reconnect";
    /// Envelope routing
    pub const DISPATCH: &str = "mev_realtime::dispatch";
    /// State sync stores
    pub const STORE: &str = "mev_realtime::store";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_log_config_production() {
        let config = LogConfig::production(PathBuf::from("/var/log/mev"));
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/mev")));
    }

    #[test]
    fn test_log_format_serde() {
        let json = serde_json::to_string(&LogFormat::Json).unwrap();
        assert_eq!(json, "\"json\"");

        let parsed: LogFormat = serde_json::from_str("\"compact\"").unwrap();
        assert_eq!(parsed, LogFormat::Compact);
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
