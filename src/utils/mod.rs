pub mod retry;

use alloy_primitives::Address;
use anyhow::{Context, Result, ensure};
use std::path::Path;
use tracing::info;

use crate::models::common::Config;

const ENV_PREFIX: &str = "INDEXER";

/// Loads the YAML config file, letting `INDEXER__*` environment variables override any field.
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<Config> {
    let config_path = config_path.as_ref();
    info!("Config path: {}", config_path.to_string_lossy());

    let config: Config = config::Config::builder()
        .add_source(config::File::from(config_path))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read config file")?
        .try_deserialize()
        .context("failed to parse config")?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    ensure!(config.batch_size >= 1, "batch_size must be at least 1");
    ensure!(
        config.max_concurrent_definitions >= 1,
        "max_concurrent_definitions must be at least 1"
    );
    ensure!(!config.rpc_url.is_empty(), "rpc_url must be set");
    ensure!(!config.database_path.is_empty(), "database_path must be set");
    Ok(())
}

/// Canonical (EIP-55 checksummed) string form used for every persisted address.
pub fn format_address(address: &Address) -> String {
    address.to_checksum(None)
}

pub(crate) fn strip_html(error: &str) -> String {
    // If the error contains HTML tags, extract just the text content
    if error.contains("<!doctype html>") || error.contains("<html>") {
        // Remove all HTML tags and return the first non-empty line of text
        error
            .lines()
            .map(|line| line.trim())
            .find(|line| {
                !line.starts_with('<')
                    && !line.ends_with('>')
                    && !line.is_empty()
                    && *line != "html"
                    && *line != "body"
            })
            .unwrap_or(error)
            .to_string()
    } else {
        error.to_string()
    }
}
