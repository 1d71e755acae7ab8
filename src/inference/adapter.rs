//! Model adapter lifecycle
//!
//! [`ModelAdapter`] holds configuration only. [`ModelAdapter::load`] resolves and
//! loads the checkpoint once and hands back a [`LoadedAdapter`], which serves any
//! number of `predict` calls through a shared reference.

use crate::error::{AdapterError, Result};
use crate::inference::backend::ChatModel;
use crate::inference::llama::LlamaChatModel;
use crate::storage;
use crate::storage::huggingface::resolve_checkpoint;
use crate::system::gpu::{detect_gpu, resolve_placement};
use crate::types::config::AdapterConfig;
use crate::types::generation::GenerationConfig;
use crate::types::model::Placement;
use crate::types::request::{PredictRequest, PredictResponse};
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

/// Unloaded adapter
#[derive(Debug, Clone)]
pub struct ModelAdapter {
    config: AdapterConfig,
}

impl ModelAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Resolve the checkpoint, place it and load tokenizer plus weights
    ///
    /// Download and initialization errors are returned as-is; nothing is retried.
    pub async fn load(&self) -> Result<LoadedAdapter<LlamaChatModel>> {
        self.config.validate()?;
        let meta = &self.config.model_metadata;
        let options = self.config.load.clone();

        let models_dir = storage::models_dir(options.cache_dir.as_deref())?;
        let path = resolve_checkpoint(meta, options.precision, &models_dir).await?;

        let gpu = tokio::task::spawn_blocking(detect_gpu)
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        let placement = resolve_placement(
            options.device_map,
            options.precision,
            &gpu,
            llama_cpp_2::llama_supports_gpu_offload(),
        );
        if !placement.is_offloaded() && gpu.is_available {
            tracing::info!("{} detected but not used, running on the CPU", gpu.name);
        }
        tracing::info!(
            "Placement for {}: {} ({} GPU layers, {})",
            meta.repo_id,
            placement.accelerator,
            placement.gpu_layers,
            placement.precision.tag()
        );

        let repo_id = meta.repo_id.clone();
        let load_placement = placement.clone();
        let model = tokio::task::spawn_blocking(move || {
            LlamaChatModel::load(&repo_id, &path, &load_placement, &options)
        })
        .await
        .map_err(|e| AdapterError::ModelLoad(e.to_string()))??;

        Ok(LoadedAdapter::new(model, placement))
    }
}

/// Adapter with a loaded model, ready to serve requests
pub struct LoadedAdapter<M = LlamaChatModel> {
    model: M,
    placement: Placement,
}

impl<M: ChatModel> LoadedAdapter<M> {
    pub fn new(model: M, placement: Placement) -> Self {
        Self { model, placement }
    }

    /// Wrap an already loaded model placed on the CPU
    pub fn from_model(model: M) -> Self {
        Self::new(model, Placement::cpu(Default::default()))
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Generate the assistant reply for a conversation
    pub fn predict(&self, request: PredictRequest) -> Result<PredictResponse> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("predict", %request_id);
        let _guard = span.enter();

        if request.messages.is_empty() {
            return Err(AdapterError::InvalidRequest(
                "messages must contain at least one message".to_string(),
            ));
        }

        let special = self.model.special_tokens();
        let config = GenerationConfig::resolve(special, request.generate_args.as_ref())?;

        let prompt = self.model.render_chat(&request.messages, true)?;
        let input_ids = self.model.encode(&prompt, false)?;
        tracing::debug!(
            "Prompt: {} messages, {} tokens",
            request.messages.len(),
            input_ids.len()
        );

        let started = Instant::now();
        let output_ids = self.model.generate(&input_ids, &config)?;
        let new_ids = output_ids.get(input_ids.len()..).ok_or_else(|| {
            AdapterError::Generation(format!(
                "Model returned {} tokens for a {} token prompt",
                output_ids.len(),
                input_ids.len()
            ))
        })?;

        let text = self.model.decode(new_ids, false)?;
        let output = strip_eos(&text, &special.eos_token).to_string();

        tracing::debug!(
            "Generated {} tokens in {} ms",
            new_ids.len(),
            started.elapsed().as_millis()
        );
        Ok(PredictResponse { output })
    }

    /// `predict` over untyped JSON, for hosts that pass plain mappings
    pub fn predict_value(&self, request: Value) -> Result<Value> {
        let request: PredictRequest = serde_json::from_value(request)
            .map_err(|e| AdapterError::InvalidRequest(e.to_string()))?;
        Ok(serde_json::to_value(self.predict(request)?)?)
    }
}

/// Remove one trailing end-of-sequence marker
pub fn strip_eos<'a>(text: &'a str, eos_token: &str) -> &'a str {
    if eos_token.is_empty() {
        return text;
    }
    text.strip_suffix(eos_token).unwrap_or(text)
}
