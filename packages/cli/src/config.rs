//! CLI Configuration
//!
//! Manages the feed host and bearer token stored in ~/.devfeed/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use devfeed_agent::{FeedEndpoint, TokenProvider};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub host: Option<String>,
    pub page_scheme: Option<String>,
    pub token: Option<String>,
    pub device_type: Option<String>,
}

impl Config {
    /// Get the config file path (~/.devfeed/config.toml)
    pub fn path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".devfeed").join("config.toml"))
    }

    /// Load config from disk
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Backend host (default: localhost:8001)
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost:8001")
    }

    pub fn page_scheme(&self) -> &str {
        self.page_scheme.as_deref().unwrap_or("http")
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Endpoint for the saved host, optionally overriding the device type
    pub fn endpoint(&self, device_type: Option<String>) -> FeedEndpoint {
        FeedEndpoint::new(self.host())
            .with_page_scheme(self.page_scheme())
            .with_device_type(device_type.or_else(|| self.device_type.clone()))
    }
}

/// Reads the token from the config file on every lookup, so a `devfeed
/// login` in another terminal is used on the next reconnect.
pub struct SavedToken {
    path: PathBuf,
}

impl SavedToken {
    pub fn new() -> Result<Self> {
        Ok(Self { path: Config::path()? })
    }
}

impl TokenProvider for SavedToken {
    fn token(&self) -> Option<String> {
        match Config::load_from(&self.path) {
            Ok(config) => config.token,
            Err(e) => {
                debug!(error = %e, "Saved token not readable");
                None
            }
        }
    }
}
