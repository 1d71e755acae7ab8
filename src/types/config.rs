//! Configuration types
//!
//! Adapter configuration: which checkpoint to load and how to place it.

use crate::error::{AdapterError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Which checkpoint to load
    pub model_metadata: ModelMetadata,
    /// Load-time placement options
    #[serde(default)]
    pub load: LoadOptions,
}

/// Checkpoint identification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// HuggingFace repo id, HuggingFace URL, or path to a local `.gguf` file
    pub repo_id: String,
    /// Branch, tag or commit to download from
    #[serde(default = "default_revision")]
    pub revision: String,
    /// Pin a specific GGUF file inside the repository
    #[serde(default)]
    pub gguf_file: Option<String>,
}

fn default_revision() -> String {
    "main".to_string()
}

/// How model layers are placed on devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMap {
    /// Offload everything when an accelerator is detected, otherwise run on CPU
    #[default]
    Auto,
    /// Keep every layer on the CPU
    Cpu,
    /// Offload exactly this many layers
    GpuLayers(u32),
}

/// Floating-point format the checkpoint is selected for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Bf16,
    F16,
    F32,
}

impl Precision {
    /// Tag used in GGUF file names
    pub fn tag(&self) -> &'static str {
        match self {
            Precision::Bf16 => "bf16",
            Precision::F16 => "f16",
            Precision::F32 => "f32",
        }
    }
}

/// Load-time options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadOptions {
    #[serde(default)]
    pub device_map: DeviceMap,
    #[serde(default)]
    pub precision: Precision,
    /// Upper bound for the per-request context window (defaults to the training context)
    #[serde(default)]
    pub context_size: Option<u32>,
    /// Named chat template overriding the one embedded in the checkpoint
    #[serde(default)]
    pub chat_template: Option<String>,
    /// Where downloaded checkpoints are kept
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Forward llama.cpp's own log output
    #[serde(default)]
    pub backend_logs: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            device_map: DeviceMap::Auto,
            precision: Precision::Bf16,
            context_size: None,
            chat_template: None,
            cache_dir: None,
            backend_logs: false,
        }
    }
}

impl AdapterConfig {
    /// Configuration for a repository with default load options
    pub fn new(repo_id: impl Into<String>) -> Self {
        Self {
            model_metadata: ModelMetadata {
                repo_id: repo_id.into(),
                revision: default_revision(),
                gguf_file: None,
            },
            load: LoadOptions::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let meta = &self.model_metadata;
        if meta.repo_id.trim().is_empty() {
            return Err(AdapterError::Config(
                "model_metadata.repo_id must not be empty".to_string(),
            ));
        }
        if meta.revision.trim().is_empty() {
            return Err(AdapterError::Config(
                "model_metadata.revision must not be empty".to_string(),
            ));
        }
        if let Some(file) = &meta.gguf_file {
            if !file.to_lowercase().ends_with(".gguf") {
                return Err(AdapterError::Config(format!(
                    "model_metadata.gguf_file must name a .gguf file, got {:?}",
                    file
                )));
            }
        }
        if self.load.context_size == Some(0) {
            return Err(AdapterError::Config(
                "load.context_size must be at least 1".to_string(),
            ));
        }
        if let Some(template) = &self.load.chat_template {
            if template.trim().is_empty() {
                return Err(AdapterError::Config(
                    "load.chat_template must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_load_options() {
        let options = LoadOptions::default();
        assert_eq!(options.device_map, DeviceMap::Auto);
        assert_eq!(options.precision, Precision::Bf16);
        assert!(options.context_size.is_none());
        assert!(options.cache_dir.is_none());
        assert!(!options.backend_logs);
    }

    #[test]
    fn test_minimal_config() {
        let config: AdapterConfig = serde_json::from_str(
            r#"{"model_metadata": {"repo_id": "Qwen/Qwen2.5-0.5B-Instruct-GGUF"}}"#,
        )
        .unwrap();
        assert_eq!(config.model_metadata.revision, "main");
        assert_eq!(config.load, LoadOptions::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_device_map_forms() {
        let auto: DeviceMap = serde_json::from_str(r#""auto""#).unwrap();
        let cpu: DeviceMap = serde_json::from_str(r#""cpu""#).unwrap();
        let gpu: DeviceMap = serde_json::from_str(r#"{"gpu_layers": 20}"#).unwrap();
        assert_eq!(auto, DeviceMap::Auto);
        assert_eq!(cpu, DeviceMap::Cpu);
        assert_eq!(gpu, DeviceMap::GpuLayers(20));
    }

    #[test]
    fn test_precision_tags() {
        let p: Precision = serde_json::from_str(r#""f16""#).unwrap();
        assert_eq!(p.tag(), "f16");
        assert_eq!(Precision::default().tag(), "bf16");
    }

    #[test]
    fn test_config_validation() {
        let mut config = AdapterConfig::new("  ");
        assert!(matches!(config.validate(), Err(AdapterError::Config(_))));

        config.model_metadata.repo_id = "owner/model".to_string();
        config.model_metadata.gguf_file = Some("model.safetensors".to_string());
        assert!(config.validate().is_err());

        config.model_metadata.gguf_file = Some("model-BF16.GGUF".to_string());
        assert!(config.validate().is_ok());

        config.load.context_size = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = AdapterConfig::new("owner/model");
        let json = serde_json::to_string(&config).expect("Failed to serialize");
        let deserialized: AdapterConfig = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(config, deserialized);
    }
}
