//! Bearer Token Lookup
//!
//! The feed never issues or stores tokens; it asks a provider every time it
//! builds a URL so rotated tokens are picked up on the next connect.

use std::path::PathBuf;
use tracing::debug;

pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A fixed token (or none)
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Token read from an environment variable
#[derive(Debug, Clone)]
pub struct EnvToken {
    pub var: String,
}

impl TokenProvider for EnvToken {
    fn token(&self) -> Option<String> {
        std::env::var(&self.var).ok()
    }
}

/// Token read from a file on every lookup
#[derive(Debug, Clone)]
pub struct FileToken {
    pub path: PathBuf,
}

impl TokenProvider for FileToken {
    fn token(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Token file not readable");
                None
            }
        }
    }
}

/// First non-empty token among several providers
#[derive(Default)]
pub struct TokenChain {
    providers: Vec<Box<dyn TokenProvider>>,
}

impl TokenChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl TokenProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }
}

impl TokenProvider for TokenChain {
    fn token(&self) -> Option<String> {
        self.providers
            .iter()
            .filter_map(|p| p.token())
            .find(|t| !t.is_empty())
    }
}
