//! Devfeed Agent CLI Entry Point
//!
//! Runs a device feed headless and logs what it sees.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use devfeed_agent::cli::config::Config;
use devfeed_agent::cli::logging::init_tracing;
use devfeed_agent::connection::machine::redacted;
use devfeed_agent::{DeviceFeedBuilder, DeviceRecord, FeedError, FeedListener};

#[derive(Parser)]
#[command(name = "devfeed-agent")]
#[command(author, version, about = "Devfeed Agent - Real-time device feed client")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/devfeed.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the feed and log device activity until Ctrl-C
    Start {
        /// Device type to follow (overrides the config file)
        #[arg(short, long)]
        device_type: Option<String>,
    },
    /// Validate the configuration and print the resolved feed URL
    CheckConfig,
    /// Show version information
    Version,
}

/// Logs feed activity
struct LogListener;

impl FeedListener for LogListener {
    fn on_data_update(&self, devices: &[DeviceRecord]) {
        info!(devices = devices.len(), "Device data updated");
    }

    fn on_server_error(&self, message: &str) {
        warn!(message, "Server reported an error");
    }

    fn on_connection_error(&self, error: &FeedError) {
        if !error.is_transient() {
            error!(error = %error, "Feed connection failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { device_type } => {
            let config = load_config(&cli.config)?;
            init_tracing(&config.logging, cli.verbose)?;
            start_feed(config, device_type).await?;
        }
        Commands::CheckConfig => {
            let config = load_config(&cli.config)?;
            check_config(&config);
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load(path)
    } else {
        eprintln!(
            "Config file {} not found, using defaults",
            path.display()
        );
        Ok(Config::default_config())
    }
}

async fn start_feed(mut config: Config, device_type: Option<String>) -> Result<()> {
    info!("Starting Devfeed Agent...");

    if device_type.is_some() {
        config.feed.device_type = device_type;
    }

    let feed = DeviceFeedBuilder::from_config(&config)
        .listener(Arc::new(LogListener))
        .auto_connect(true)
        .build();
    info!(url = %redacted(&feed.url()), "Device feed started");

    let mut status = feed.watch_status();
    let mut summary = feed.watch_summary();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Shutdown requested");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    warn!("Feed connection task stopped");
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!(
                    state = %current.state,
                    attempts = current.attempt_count,
                    reconnect_pending = current.reconnect_pending,
                    error = current.last_error.as_deref().unwrap_or(""),
                    "Feed status changed"
                );
            }
            changed = summary.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = summary.borrow_and_update().clone();
                info!(summary = %current, "Device summary updated");
            }
        }
    }

    feed.shutdown().await;
    info!("Devfeed Agent stopped");
    Ok(())
}

fn check_config(config: &Config) {
    let url = config.endpoint().build_url(config.token_provider().token().as_deref());

    println!("Configuration OK");
    println!("  Feed URL:           {}", redacted(&url));
    println!(
        "  Device type:        {}",
        config.feed.device_type.as_deref().unwrap_or("all")
    );
    println!("  Reconnect limit:    {}", config.connection.reconnect_limit);
    println!("  Reconnect interval: {} ms", config.connection.reconnect_interval_ms);
    if config.connection.heartbeat_interval_ms == 0 {
        println!("  Heartbeat:          disabled");
    } else {
        println!("  Heartbeat:          {} ms", config.connection.heartbeat_interval_ms);
    }
}

fn show_version() {
    println!("devfeed-agent {}", env!("CARGO_PKG_VERSION"));
    println!("Real-time device feed client");
    println!();
    println!("Features:");
    println!("  - WebSocket device feed with automatic reconnection");
    println!("  - Heartbeat keep-alive");
    println!("  - Device type subscriptions");
}
