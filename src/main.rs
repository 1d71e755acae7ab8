//! Minimal host for the adapter
//!
//! Loads the model once, then answers one JSON request per stdin line with one
//! JSON response per stdout line.

use chat_adapter::storage::config::load_config;
use chat_adapter::storage::huggingface::format_size;
use chat_adapter::ModelAdapter;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "CHAT_ADAPTER_CONFIG";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .ok_or("usage: chat-adapter <config.json> (or set CHAT_ADAPTER_CONFIG)")?;

    let config = load_config(&config_path)?;
    let adapter = Arc::new(ModelAdapter::new(config).load().await?);
    let info = adapter.model().info();
    tracing::info!(
        "Ready with {} ({}, {} parameters), reading requests from stdin",
        info.repo_id,
        format_size(info.size_bytes),
        info.parameters
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(&line) {
            Ok(request) => {
                let adapter = adapter.clone();
                match tokio::task::spawn_blocking(move || adapter.predict_value(request)).await {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        tracing::warn!("Request failed: {}", e);
                        json!({ "error": e.to_string() })
                    }
                    Err(e) => {
                        tracing::error!("Request aborted: {}", e);
                        json!({ "error": format!("Internal error: {}", e) })
                    }
                }
            }
            Err(e) => json!({ "error": format!("Invalid JSON: {}", e) }),
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    Ok(())
}
