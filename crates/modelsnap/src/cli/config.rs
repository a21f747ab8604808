//! `modelsnap config`

use anyhow::{Context, Result};
use modelsnap_ingest::Config;

pub fn run(config: &Config, json: bool) -> Result<()> {
    let rendered = if json {
        serde_json::to_string_pretty(config).context("Failed to serialize config as JSON")?
    } else {
        toml::to_string_pretty(config).context("Failed to serialize config as TOML")?
    };
    println!("{}", rendered);
    Ok(())
}
