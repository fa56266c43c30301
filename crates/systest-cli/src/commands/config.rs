//! Configuration display.

use anyhow::{Context, Result, bail};
use systest_config::HarnessConfig;

/// Prints the effective configuration as TOML or JSON.
pub fn show(config: &HarnessConfig, format: &str) -> Result<()> {
    let rendered = match format {
        "toml" => toml::to_string_pretty(config).context("Failed to render TOML")?,
        "json" => serde_json::to_string_pretty(config).context("Failed to render JSON")?,
        other => bail!("Unknown format '{other}' (expected toml or json)"),
    };
    println!("{rendered}");
    Ok(())
}
