use std::time::Duration;

use anyhow::{bail, Result};
use colored::Colorize;
use serde_json::Value;

use super::{open_feed, spinner, wait_until_open};
use crate::config::Config;

/// Wait for the first device summary and print it
pub async fn run(type_code: Option<String>, timeout: u64) -> Result<()> {
    let config = Config::load()?;
    let timeout = Duration::from_secs(timeout);

    let feed = open_feed(config.endpoint(type_code))?;
    let mut summary = feed.watch_summary();
    let progress = spinner(&format!("Connecting to {}", config.host()))?;

    if let Err(e) = wait_until_open(&feed, timeout).await {
        progress.finish_and_clear();
        feed.shutdown().await;
        bail!("Cannot open the device feed at {}: {}", config.host(), e);
    }

    progress.set_message("Waiting for summary");
    let received = tokio::time::timeout(timeout, summary.changed()).await;
    progress.finish_and_clear();

    let current = summary.borrow_and_update().clone();
    feed.shutdown().await;

    match received {
        Ok(Ok(())) => {}
        Ok(Err(_)) => bail!("Feed connection task stopped"),
        Err(_) => bail!("No device summary within {}s", timeout.as_secs()),
    }

    println!(
        "{}",
        format!("Summary ({})", feed_label(&config)).bold()
    );
    println!("{}", "─".repeat(40));
    for (key, value) in summary_rows(&current) {
        println!("  {:<24} {:>12}", key.dimmed(), value);
    }

    Ok(())
}

fn feed_label(config: &Config) -> String {
    format!("{}://{}", config.page_scheme(), config.host())
}

/// Flatten the summary object into printable rows. Nested values print
/// as compact JSON.
fn summary_rows(summary: &Value) -> Vec<(String, String)> {
    match summary {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect(),
        Value::Null => Vec::new(),
        other => vec![("value".to_string(), other.to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_rows() {
        let rows = summary_rows(&json!({"online": 5, "status": "ok", "by_type": {"welding": 3}}));
        assert_eq!(rows.len(), 3);
        assert!(rows.contains(&("online".to_string(), "5".to_string())));
        assert!(rows.contains(&("status".to_string(), "ok".to_string())));
        assert!(rows.contains(&("by_type".to_string(), r#"{"welding":3}"#.to_string())));
        assert!(summary_rows(&json!({})).is_empty());
    }
}
