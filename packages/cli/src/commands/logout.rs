use anyhow::Result;
use colored::Colorize;

use crate::config::Config;

/// Handle the logout command
pub fn run() -> Result<()> {
    let mut config = Config::load()?;

    if !config.is_authenticated() {
        println!("{}", "Not logged in.".dimmed());
        return Ok(());
    }

    config.token = None;
    config.save()?;

    println!("{} Logged out of {}", "✓".green().bold(), config.host());
    Ok(())
}
