use anyhow::Result;
use clap::{Parser, Subcommand};

use devfeed_agent::cli::config::LoggingConfig;
use devfeed_agent::cli::logging::init_tracing;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "devfeed", about = "Devfeed CLI - Watch your devices in real time")]
#[command(version, propagate_version = true)]
struct Cli {
    /// Show connection logs on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a bearer token for the device feed
    Login {
        /// Backend host[:port] (default: localhost:8001)
        #[arg(long)]
        host: Option<String>,

        /// Use a TLS (wss) connection
        #[arg(long)]
        https: bool,
    },

    /// Forget the saved token
    Logout,

    /// Show a live device table
    Watch {
        /// Device type to follow
        #[arg(short, long)]
        type_code: Option<String>,
    },

    /// Print the device summary pushed by the server
    Summary {
        /// Device type to summarise
        #[arg(short, long)]
        type_code: Option<String>,

        /// Seconds to wait for the summary
        #[arg(long, default_value = "10")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: if cli.verbose { "debug" } else { "error" }.to_string(),
        ..LoggingConfig::default()
    };
    init_tracing(&logging, false)?;

    match cli.command {
        Commands::Login { host, https } => {
            commands::login::run(host, https).await
        }
        Commands::Logout => {
            commands::logout::run()
        }
        Commands::Watch { type_code } => {
            commands::watch::run(type_code).await
        }
        Commands::Summary { type_code, timeout } => {
            commands::summary::run(type_code, timeout).await
        }
    }
}
