pub mod login;
pub mod logout;
pub mod summary;
pub mod watch;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use colored::Colorize;
use devfeed_agent::{ConnectionState, DeviceFeed, DeviceFeedBuilder, FeedEndpoint, Notifier};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::SavedToken;

/// Prints connection failures as a red banner
pub struct BannerNotifier;

impl Notifier for BannerNotifier {
    fn notify(&self, message: &str) {
        eprintln!();
        eprintln!("{}", format!(" {} ", message).on_red().white().bold());
    }
}

/// Build and connect a feed that reads its token from the saved config
pub fn open_feed(endpoint: FeedEndpoint) -> Result<DeviceFeed> {
    let feed = DeviceFeedBuilder::new(endpoint)
        .tokens(Arc::new(SavedToken::new()?))
        .notifier(Arc::new(BannerNotifier))
        .build();
    Ok(feed)
}

/// Wait until the feed is open. Fails once the feed gives up or the
/// timeout passes.
pub async fn wait_until_open(feed: &DeviceFeed, timeout: Duration) -> Result<()> {
    let mut status = feed.watch_status();
    let wait = async {
        loop {
            {
                let current = status.borrow_and_update();
                if current.is_connected() {
                    return Ok(());
                }
                if current.state == ConnectionState::Closed && !current.reconnect_pending {
                    if let Some(error) = &current.last_error {
                        bail!("{}", error);
                    }
                }
            }
            if status.changed().await.is_err() {
                bail!("Feed connection task stopped");
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => bail!("Timed out after {}s waiting for the feed", timeout.as_secs()),
    }
}

pub fn spinner(message: &str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("{spinner:.blue} {msg}")?,
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}
