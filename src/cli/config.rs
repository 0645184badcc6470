//! Config command handler.

use std::path::Path;

use anyhow::{Context, Result};

use mcpdrive::config::Config;

/// Load config from `path`, or the default location.
pub(crate) fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Config::load().with_context(|| "Failed to load configuration"),
    }
}

/// Print the effective configuration, API key masked.
pub(crate) fn cmd_config(path: Option<&Path>) -> Result<()> {
    let source = path.map(Path::to_path_buf).unwrap_or_else(Config::path);
    println!("Config file: {}", source.display());
    if !source.exists() {
        println!("[OK] No config file found (using defaults)");
    }

    let mut config = load(path)?;
    if let Some(key) = config.model.api_key.as_mut() {
        *key = mask_secret(key);
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}
