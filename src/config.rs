//! Client configuration.
//!
//! Every field has a default so a partial TOML file is enough:
//!
//! ```toml
//! url = "wss://api.example.com/ws"
//!
//! [heartbeat]
//! interval_ms = 15000
//!
//! [reconnection]
//! backoff_multiplier = 2.0
//! max_attempts = 0
//! ```

use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    consts::LOCAL_WS_URL,
    infra::{LogConfig, ReconnectionConfig},
    prelude::*,
    store::StoreConfig,
    ws::heartbeat::HeartbeatConfig,
    Error,
};

pub const ENV_WS_URL: &str = "MEV_WS_URL";
pub const ENV_AUTH_TOKEN: &str = "MEV_AUTH_TOKEN";

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint (ws:// or wss://)
    #[serde(default = "default_url")]
    pub url: String,

    /// Credential appended to the endpoint at connect time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub reconnection: ReconnectionConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

fn default_url() -> String {
    LOCAL_WS_URL.to_string()
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("heartbeat", &self.heartbeat)
            .field("reconnection", &self.reconnection)
            .field("store", &self.store)
            .field("logging", &self.logging)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            auth_token: None,
            heartbeat: HeartbeatConfig::default(),
            reconnection: ReconnectionConfig::default(),
            store: StoreConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read a TOML file. A missing file yields the defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Override from `MEV_WS_URL` / `MEV_AUTH_TOKEN` when set.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_WS_URL).ok(),
            std::env::var(ENV_AUTH_TOKEN).ok(),
        );
    }

    fn apply_overrides(&mut self, url: Option<String>, token: Option<String>) {
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            self.url = url;
        }
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.auth_token = Some(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::LogFormat;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.url, LOCAL_WS_URL);
        assert_eq!(config.heartbeat.interval_ms, 30_000);
        assert_eq!(config.reconnection.interval_ms, 3_000);
        assert_eq!(config.reconnection.max_attempts, 5);
        assert_eq!(config.store.max_opportunities, 100);
        assert_eq!(config.store.sweep_interval_ms, 5_000);
    }

    #[test]
    fn test_partial_toml() {
        let config = ClientConfig::from_toml_str(
            r#"
            url = "wss://api.example.com/ws"

            [reconnection]
            backoff_multiplier = 2.0
            max_attempts = 0

            [store]
            max_opportunities = 25

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.url, "wss://api.example.com/ws");
        assert_eq!(config.reconnection.backoff_multiplier, 2.0);
        assert_eq!(config.reconnection.max_attempts, 0);
        assert_eq!(config.reconnection.interval_ms, 3_000);
        assert_eq!(config.store.max_opportunities, 25);
        assert_eq!(config.store.max_notifications, 50);
        assert_eq!(config.heartbeat, HeartbeatConfig::default());
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = ClientConfig::from_toml_str("url = [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");

        assert_eq!(
            ClientConfig::from_toml_file(&path).unwrap(),
            ClientConfig::default()
        );

        let mut config = ClientConfig::new("ws://10.0.0.1:9000/ws");
        config.heartbeat.max_missed_pongs = 0;
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes())
            .unwrap();

        assert_eq!(ClientConfig::from_toml_file(&path).unwrap(), config);
    }

    #[test]
    fn test_overrides() {
        let mut config = ClientConfig::default();
        config.apply_overrides(None, Some(String::new()));
        assert_eq!(config, ClientConfig::default());

        config.apply_overrides(Some("wss://x/ws".to_string()), Some("tok".to_string()));
        assert_eq!(config.url, "wss://x/ws");
        assert_eq!(config.auth_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_debug_output_redacts_token() {
        let mut config = ClientConfig::new("wss://api.example.com/ws");
        config.auth_token = Some("s3cret-token".to_string());

        let printed = format!("{config:#?}");
        assert!(!printed.contains("s3cret-token"));
        assert!(printed.contains("<redacted>"));
        assert!(printed.contains("wss://api.example.com/ws"));

        assert!(format!("{:?}", ClientConfig::default()).contains("auth_token: None"));
    }
}
