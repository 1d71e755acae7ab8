//! Persistent storage
//!
//! Checkpoint cache location, configuration files and HuggingFace downloads.

pub mod config;
pub mod huggingface;

use crate::error::{AdapterError, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the checkpoint cache root
pub const CACHE_ENV: &str = "CHAT_ADAPTER_CACHE";

/// Get the per-user cache directory for the adapter
pub fn get_cache_dir() -> Result<PathBuf> {
    ProjectDirs::from("", "", "chat-adapter")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .ok_or_else(|| AdapterError::Config("Could not determine a cache directory".to_string()))
}

/// Directory downloaded checkpoints are stored in
///
/// Precedence: explicit override, then `CHAT_ADAPTER_CACHE`, then the per-user cache.
pub fn models_dir(cache_override: Option<&Path>) -> Result<PathBuf> {
    let base = match cache_override {
        Some(dir) => dir.to_path_buf(),
        None => match std::env::var_os(CACHE_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => get_cache_dir()?,
        },
    };
    Ok(base.join("models"))
}
