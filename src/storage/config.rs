//! Configuration file loading
//!
//! Reads an [`AdapterConfig`] from a JSON file.

use crate::error::Result;
use crate::types::config::AdapterConfig;
use std::fs;
use std::path::Path;

/// Load and validate a configuration file
///
/// A relative `load.cache_dir` is resolved against the directory holding the file.
pub fn load_config(path: impl AsRef<Path>) -> Result<AdapterConfig> {
    let path = path.as_ref();
    let json = fs::read_to_string(path)?;
    let mut config: AdapterConfig = serde_json::from_str(&json)?;

    if let Some(cache_dir) = config.load.cache_dir.take() {
        let resolved = if cache_dir.is_relative() {
            path.parent()
                .map(|parent| parent.join(&cache_dir))
                .unwrap_or(cache_dir)
        } else {
            cache_dir
        };
        config.load.cache_dir = Some(resolved);
    }

    config.validate()?;

    tracing::debug!("Loaded config from {:?}", path);
    Ok(config)
}

/// Save a configuration to disk
pub fn save_config(config: &AdapterConfig, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;

    tracing::debug!("Saved config to {:?}", path);
    Ok(())
}
