//! Configuration module
//!
//! Handles loading and validating feed configuration from TOML files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::machine::ConnectionSettings;
use crate::feed::auth::{EnvToken, FileToken, StaticToken, TokenChain, TokenProvider};
use crate::feed::endpoint::FeedEndpoint;

/// Main configuration structure for the device feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Feed endpoint settings
    #[serde(default)]
    pub feed: FeedConfig,

    /// Reconnect and heartbeat settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Where the bearer token comes from
    #[serde(default)]
    pub auth: AuthConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Feed endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Backend `host[:port]`
    #[serde(default = "default_host")]
    pub host: String,

    /// Scheme of the console page (http or https); https selects wss
    #[serde(default = "default_page_scheme")]
    pub page_scheme: String,

    /// Device type to filter on (all types when unset)
    #[serde(default)]
    pub device_type: Option<String>,
}

/// Connection lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Reconnect attempts after abnormal closures before giving up
    #[serde(default = "default_reconnect_limit")]
    pub reconnect_limit: u32,

    /// Delay before each reconnect attempt in milliseconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Heartbeat interval in milliseconds (0 = disabled)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Pause between teardown and connect on a manual reconnect
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Connect as soon as the feed is created
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

/// Token source configuration. Sources are tried in field order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Inline token
    #[serde(default)]
    pub token: Option<String>,

    /// Environment variable holding the token
    #[serde(default = "default_token_env")]
    pub token_env: Option<String>,

    /// File holding the token, re-read on every connect
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_host() -> String {
    "localhost:8001".to_string()
}

fn default_page_scheme() -> String {
    "http".to_string()
}

fn default_reconnect_limit() -> u32 {
    5
}

fn default_reconnect_interval() -> u64 {
    3000
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_settle_delay() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_token_env() -> Option<String> {
    Some("DEVFEED_TOKEN".to_string())
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            page_scheme: default_page_scheme(),
            device_type: None,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_limit: default_reconnect_limit(),
            reconnect_interval_ms: default_reconnect_interval(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            settle_delay_ms: default_settle_delay(),
            auto_connect: default_true(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: None,
            token_env: default_token_env(),
            token_file: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            feed: FeedConfig::default(),
            connection: ConnectionConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Reject values the feed cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.feed.host.trim().is_empty() {
            bail!("feed.host must not be empty");
        }
        if self.feed.host.contains('/') {
            bail!("feed.host must be host[:port] without a scheme or path, got `{}`", self.feed.host);
        }
        match self.feed.page_scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => {}
            other => bail!("feed.page_scheme must be http or https, got `{}`", other),
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            bail!("logging.format must be pretty or json, got `{}`", self.logging.format);
        }
        Ok(())
    }

    pub fn endpoint(&self) -> FeedEndpoint {
        FeedEndpoint::new(&self.feed.host)
            .with_page_scheme(&self.feed.page_scheme)
            .with_device_type(self.feed.device_type.clone())
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            reconnect_limit: self.connection.reconnect_limit,
            reconnect_interval: Duration::from_millis(self.connection.reconnect_interval_ms),
            heartbeat_interval: Duration::from_millis(self.connection.heartbeat_interval_ms),
            settle_delay: Duration::from_millis(self.connection.settle_delay_ms),
        }
    }

    /// Token sources in precedence order: inline, environment, file
    pub fn token_provider(&self) -> Arc<dyn TokenProvider> {
        let mut chain = TokenChain::new().with(StaticToken(self.auth.token.clone()));
        if let Some(var) = &self.auth.token_env {
            chain = chain.with(EnvToken { var: var.clone() });
        }
        if let Some(path) = &self.auth.token_file {
            chain = chain.with(FileToken { path: path.clone() });
        }
        Arc::new(chain)
    }
}
