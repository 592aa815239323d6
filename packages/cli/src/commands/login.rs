use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use colored::Colorize;
use dialoguer::Password;
use devfeed_agent::feed::auth::StaticToken;
use devfeed_agent::DeviceFeedBuilder;

use super::{spinner, wait_until_open, BannerNotifier};
use crate::config::Config;

/// Handle the login command
pub async fn run(host: Option<String>, https: bool) -> Result<()> {
    println!("{}", "Devfeed Login".bold());
    println!();

    let mut config = Config::load().unwrap_or_default();

    if let Some(host) = host {
        config.host = Some(host);
    }
    if https {
        config.page_scheme = Some("https".to_string());
    }

    let token: String = Password::new()
        .with_prompt("Feed Token")
        .interact()?;
    let token = token.trim().to_string();

    if token.is_empty() {
        bail!("Token cannot be empty");
    }

    // Verify the token by opening the feed once
    let progress = spinner(&format!("Connecting to {}", config.host()))?;
    let feed = DeviceFeedBuilder::new(config.endpoint(None))
        .tokens(Arc::new(StaticToken(Some(token.clone()))))
        .notifier(Arc::new(BannerNotifier))
        .build();
    let verified = wait_until_open(&feed, Duration::from_secs(10)).await;
    feed.shutdown().await;

    if let Err(e) = verified {
        progress.finish_and_clear();
        bail!("Cannot open the device feed at {}: {}", config.host(), e);
    }
    progress.finish_and_clear();

    config.token = Some(token);
    config.save()?;

    println!(
        "{} Logged in to {}",
        "✓".green().bold(),
        config.host()
    );
    println!(
        "  Config saved to {}",
        Config::path()?.display().to_string().dimmed()
    );

    Ok(())
}
