//! Configuration for the relay, read from `portrelay.toml`.
//!
//! Layers are applied file → environment → CLI. Every field has a default,
//! so a missing file is the same as an empty one.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//!
//! [upstream]
//! api_base = "http://localhost:3000"
//! ws_url = "ws://localhost:3000/ws"
//!
//! [polling]
//! interval_ms = 3000
//! metrics_limit = 6
//!
//! [websocket]
//! reconnect_delay_ms = 3000
//! reconnect_when_idle = true
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! # directory = "logs"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "portrelay.toml";

pub const ENV_API_BASE: &str = "PORTRELAY_API_BASE";
pub const ENV_WS_URL: &str = "PORTRELAY_WS_URL";
pub const ENV_PORT: &str = "PORTRELAY_PORT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where the relay's own data comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamSection {
    /// Base URL; metrics are fetched from `{api_base}/metrics`.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Full URL of the upstream WebSocket.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            ws_url: default_ws_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Number of samples kept from each metrics scrape.
    #[serde(default = "default_metrics_limit")]
    pub metrics_limit: usize,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            metrics_limit: default_metrics_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebsocketSection {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Keep reconnecting after a close even when nobody is subscribed to
    /// the `websocket` topic.
    #[serde(default = "default_true")]
    pub reconnect_when_idle: bool,
}

impl Default for WebsocketSection {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_when_idle: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Write daily-rolled log files here instead of stderr.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

/// Root of `portrelay.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub polling: PollingSection,
    #[serde(default)]
    pub websocket: WebsocketSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

fn default_api_base() -> String {
    "http://localhost:3000".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:3000/ws".to_string()
}

fn default_interval_ms() -> u64 {
    3000
}

fn default_metrics_limit() -> usize {
    6
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse portrelay.toml")
    }

    /// Load `path` if given, otherwise `portrelay.toml` in `dir`.
    /// Falls back to defaults when the implicit file is absent; an explicit
    /// path must exist.
    pub fn load_or_default(path: Option<&Path>, dir: &Path) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let implicit = dir.join(CONFIG_FILE_NAME);
                if implicit.exists() {
                    Self::load(&implicit)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize portrelay.toml")
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_base) = lookup(ENV_API_BASE) {
            self.upstream.api_base = api_base;
        }
        if let Some(ws_url) = lookup(ENV_WS_URL) {
            self.upstream.ws_url = ws_url;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .parse()
                .with_context(|| format!("{} must be a port number, got '{}'", ENV_PORT, port))?;
        }
        Ok(())
    }

    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Return every problem found; empty means the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.polling.interval_ms == 0 {
            problems.push("polling.interval_ms must be greater than zero".to_string());
        }
        if self.polling.metrics_limit == 0 {
            problems.push("polling.metrics_limit must be greater than zero".to_string());
        }
        if self.websocket.reconnect_delay_ms == 0 {
            problems.push("websocket.reconnect_delay_ms must be greater than zero".to_string());
        }
        if !has_scheme(&self.upstream.api_base, &["http://", "https://"]) {
            problems.push(format!(
                "Invalid upstream.api_base '{}': expected an http:// or https:// URL",
                self.upstream.api_base
            ));
        }
        if !has_scheme(&self.upstream.ws_url, &["ws://", "wss://"]) {
            problems.push(format!(
                "Invalid upstream.ws_url '{}': expected a ws:// or wss:// URL",
                self.upstream.ws_url
            ));
        }

        problems
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.websocket.reconnect_delay_ms)
    }

    pub fn metrics_url(&self) -> String {
        format!("{}/metrics", self.upstream.api_base.trim_end_matches('/'))
    }
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    schemes
        .iter()
        .any(|scheme| url.starts_with(scheme) && url.len() > scheme.len())
}
