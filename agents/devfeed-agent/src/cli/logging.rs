//! Tracing/logging initialization

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::config::LoggingConfig;

/// Initialize the tracing subscriber. `RUST_LOG` wins over the configured
/// level; `verbose` forces debug.
pub fn init_tracing(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    match config.format.as_str() {
        "json" => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true);
            subscriber
                .with(fmt_layer)
                .try_init()
                .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;
        }
        _ => {
            let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
            subscriber
                .with(fmt_layer)
                .try_init()
                .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;
        }
    }

    Ok(())
}
