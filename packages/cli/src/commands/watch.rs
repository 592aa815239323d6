use anyhow::{bail, Result};
use std::fmt::Write as _;

use chrono::Local;
use colored::{ColoredString, Colorize};
use console::Term;
use serde_json::Value;
use tracing::debug;

use devfeed_agent::{ConnectionState, DeviceRecord};

use super::{open_feed, spinner};
use crate::config::Config;

/// Show a live device table until Ctrl-C
pub async fn run(type_code: Option<String>) -> Result<()> {
    let config = Config::load()?;
    if !config.is_authenticated() {
        println!(
            "{} No saved token, connecting anonymously. Run `devfeed login` first if the feed requires one.",
            "!".yellow().bold()
        );
    }

    let feed = open_feed(config.endpoint(type_code))?;
    let term = Term::stdout();
    let progress = spinner(&format!("Connecting to {}", config.host()))?;

    let mut status = feed.watch_status();
    let mut devices = feed.watch_devices();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = status.borrow_and_update().clone();
                if current.is_connected() {
                    if !progress.is_finished() {
                        progress.finish_and_clear();
                        redraw(&term, &render_table(&feed.devices(), feed.device_type().as_deref()));
                    }
                } else if current.reconnect_pending {
                    let message = format!(
                        "Connection lost, reconnecting (attempt {})",
                        current.attempt_count
                    );
                    if progress.is_finished() {
                        eprintln!("{} {}", "!".yellow().bold(), message);
                    } else {
                        progress.set_message(message);
                    }
                } else if current.state == ConnectionState::Closed {
                    if let Some(error) = current.last_error {
                        progress.finish_and_clear();
                        break Err(error);
                    }
                }
            }
            changed = devices.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = devices.borrow_and_update().clone();
                if progress.is_finished() {
                    redraw(&term, &render_table(&snapshot, feed.device_type().as_deref()));
                }
            }
        }
    };

    feed.shutdown().await;

    if let Err(error) = outcome {
        bail!("Device feed closed: {}", error);
    }
    Ok(())
}

/// Replace the terminal contents with a freshly rendered table
fn redraw(term: &Term, table: &str) {
    if let Err(e) = term.clear_screen() {
        debug!(error = %e, "Failed to clear screen");
    }
    if let Err(e) = term.write_str(table) {
        debug!(error = %e, "Failed to write device table");
    }
}

fn render_table(devices: &[DeviceRecord], device_type: Option<&str>) -> String {
    let rule = "─".repeat(70);
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} {}",
        format!("Devices ({})", device_type.unwrap_or("all types")).bold(),
        Local::now().format("%H:%M:%S").to_string().dimmed()
    );
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "  {:<16} {:<24} {:<12} {:>14}",
        "CODE".dimmed(),
        "NAME".dimmed(),
        "STATUS".dimmed(),
        "UPDATED".dimmed(),
    );
    let _ = writeln!(out, "{}", rule);

    if devices.is_empty() {
        let _ = writeln!(out, "  {}", "No devices reported yet.".dimmed());
    }

    for device in devices {
        let _ = writeln!(
            out,
            "  {:<16} {:<24} {:<12} {:>14}",
            device.device_code,
            cell(device.get("device_name")),
            status_color(&cell(device.get("device_status"))),
            cell(device.get("ts")),
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{} device(s), Ctrl-C to quit", devices.len());
    out
}

/// Render a JSON field for a table cell
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn status_color(status: &str) -> ColoredString {
    match status {
        "online" | "welding" | "running" => status.green(),
        "offline" | "alarm" | "error" => status.red(),
        "standby" | "idle" => status.yellow(),
        _ => status.normal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_rendering() {
        assert_eq!(cell(None), "-");
        assert_eq!(cell(Some(&Value::Null)), "-");
        assert_eq!(cell(Some(&json!("Welder 3"))), "Welder 3");
        assert_eq!(cell(Some(&json!(12.5))), "12.5");
        assert_eq!(cell(Some(&json!(true))), "true");
    }

    #[test]
    fn test_render_table_lists_devices() {
        let devices: Vec<DeviceRecord> = [
            json!({"device_code": "W-01", "device_name": "Welder 1", "device_status": "online"}),
            json!({"device_code": "C-07", "ts": "10:42:00"}),
        ]
        .iter()
        .filter_map(DeviceRecord::from_value)
        .collect();

        let table = render_table(&devices, Some("welding"));
        assert!(table.contains("Devices (welding)"));
        assert!(table.contains("W-01"));
        assert!(table.contains("Welder 1"));
        assert!(table.contains("10:42:00"));
        assert!(table.contains("2 device(s)"));
        assert!(!table.contains("No devices reported yet."));

        let empty = render_table(&[], None);
        assert!(empty.contains("Devices (all types)"));
        assert!(empty.contains("No devices reported yet."));
        assert!(empty.contains("0 device(s)"));
    }
}
