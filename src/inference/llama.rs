//! llama.cpp backed chat model
//!
//! Tokenizer, chat template and weights all come from one GGUF checkpoint. The
//! model handle is immutable after loading; each generation call gets its own
//! context and sampler.

use crate::error::{AdapterError, Result};
use crate::inference::backend::ChatModel;
use crate::types::config::LoadOptions;
use crate::types::generation::GenerationConfig;
use crate::types::message::ChatMessage;
use crate::types::model::{ModelInfo, Placement, SpecialTokens, TokenId};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaChatTemplate, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::TokenToStringError;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::OnceLock;

/// Global llama.cpp backend (can only be initialized once)
static LLAMA_BACKEND: OnceLock<std::result::Result<LlamaBackend, String>> = OnceLock::new();

/// Get or initialize the global llama.cpp backend
///
/// `backend_logs` only takes effect on the first call.
fn get_backend(backend_logs: bool) -> Result<&'static LlamaBackend> {
    let result = LLAMA_BACKEND.get_or_init(|| {
        let mut backend = LlamaBackend::init().map_err(|e| e.to_string())?;
        if !backend_logs {
            backend.void_logs();
        }
        Ok(backend)
    });
    result.as_ref().map_err(|e| AdapterError::Backend(e.clone()))
}

const PIECE_BUFFER: usize = 32;
const PAD_TOKEN_KEY: &str = "tokenizer.ggml.padding_token_id";

/// GGUF checkpoint loaded through llama.cpp
pub struct LlamaChatModel {
    model: LlamaModel,
    template: LlamaChatTemplate,
    special: SpecialTokens,
    context_cap: usize,
    info: ModelInfo,
}

impl LlamaChatModel {
    /// Load a checkpoint and place it according to `placement`
    ///
    /// Blocking; call from a blocking thread in async hosts.
    pub fn load(
        repo_id: &str,
        path: &Path,
        placement: &Placement,
        options: &LoadOptions,
    ) -> Result<Self> {
        let backend = get_backend(options.backend_logs)?;

        let params = LlamaModelParams::default().with_n_gpu_layers(placement.gpu_layers);
        tracing::info!(
            "Loading {:?} on {} ({} GPU layers)",
            path,
            placement.accelerator,
            placement.gpu_layers
        );
        let model = LlamaModel::load_from_file(backend, path, &params)
            .map_err(|e| AdapterError::ModelLoad(e.to_string()))?;

        let template = match &options.chat_template {
            Some(name) => LlamaChatTemplate::new(name)
                .map_err(|e| AdapterError::ChatTemplate(e.to_string()))?,
            None => model.chat_template(None).map_err(|e| {
                AdapterError::ChatTemplate(format!(
                    "{}; set load.chat_template for checkpoints without one",
                    e
                ))
            })?,
        };

        let n_ctx_train = model.n_ctx_train();
        let context_size = match options.context_size {
            Some(size) if size > n_ctx_train => {
                tracing::warn!(
                    "Context size {} exceeds the training context, capping to {}",
                    size,
                    n_ctx_train
                );
                n_ctx_train
            }
            Some(size) => size,
            None => n_ctx_train,
        };

        let eos = model.token_eos();
        let eos_token = String::from_utf8_lossy(&piece_bytes(&model, eos, true)?).into_owned();
        let pad_token_id = model
            .meta_val_str(PAD_TOKEN_KEY)
            .ok()
            .and_then(|v| v.trim().parse::<TokenId>().ok());
        let special = SpecialTokens {
            eos_token_id: u32::try_from(eos.0).ok(),
            eos_token,
            pad_token_id,
        };

        let info = ModelInfo {
            repo_id: repo_id.to_string(),
            path: path.to_path_buf(),
            size_bytes: model.size(),
            parameters: model.n_params(),
            context_length: n_ctx_train,
        };
        tracing::info!(
            "Model loaded: {} parameters, context {}, eos {:?}",
            info.parameters,
            info.context_length,
            special.eos_token
        );

        Ok(Self {
            model,
            template,
            special,
            context_cap: context_size as usize,
            info,
        })
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn new_context(&self, n_ctx: usize) -> Result<LlamaContext<'_>> {
        let backend = get_backend(false)?;
        let size = NonZeroU32::new(n_ctx as u32)
            .ok_or_else(|| AdapterError::Generation("Context size must be non-zero".to_string()))?;
        let params = LlamaContextParams::default()
            .with_n_ctx(Some(size))
            .with_n_batch(n_ctx as u32);
        self.model
            .new_context(backend, params)
            .map_err(|e| AdapterError::Generation(e.to_string()))
    }
}

fn piece_bytes(model: &LlamaModel, token: LlamaToken, special: bool) -> Result<Vec<u8>> {
    match model.token_to_piece_bytes(token, PIECE_BUFFER, special, None) {
        Ok(bytes) => Ok(bytes),
        Err(TokenToStringError::InsufficientBufferSpace(needed)) => model
            .token_to_piece_bytes(token, needed.unsigned_abs() as usize, special, None)
            .map_err(|e| AdapterError::Decode(e.to_string())),
        Err(e) => Err(AdapterError::Decode(e.to_string())),
    }
}

/// One stage of the sampler chain
#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Penalties { last_n: i32, repeat: f32 },
    Temp(f32),
    TopK(i32),
    TopP(f32),
    Dist(u32),
    Greedy,
}

/// Penalty first, then temperature scaling ahead of the top-k/top-p filters
fn sampler_stages(config: &GenerationConfig, penalty_window: usize) -> Vec<Stage> {
    let mut stages = Vec::new();

    if config.repetition_penalty != 1.0 {
        stages.push(Stage::Penalties {
            last_n: i32::try_from(penalty_window).unwrap_or(i32::MAX),
            repeat: config.repetition_penalty,
        });
    }

    if config.do_sample {
        stages.push(Stage::Temp(config.temperature.unwrap_or(1.0)));
        if let Some(k) = config.top_k {
            stages.push(Stage::TopK(i32::try_from(k).unwrap_or(i32::MAX)));
        }
        if let Some(p) = config.top_p {
            stages.push(Stage::TopP(p));
        }
        // LLAMA_DEFAULT_SEED makes llama.cpp draw a random seed
        stages.push(Stage::Dist(config.seed.unwrap_or(u32::MAX)));
    } else {
        stages.push(Stage::Greedy);
    }

    stages
}

fn build_sampler(config: &GenerationConfig, penalty_window: usize) -> LlamaSampler {
    let stages = sampler_stages(config, penalty_window)
        .into_iter()
        .map(|stage| match stage {
            Stage::Penalties { last_n, repeat } => LlamaSampler::penalties(last_n, repeat, 0.0, 0.0),
            Stage::Temp(t) => LlamaSampler::temp(t),
            Stage::TopK(k) => LlamaSampler::top_k(k),
            Stage::TopP(p) => LlamaSampler::top_p(p, 1),
            Stage::Dist(seed) => LlamaSampler::dist(seed),
            Stage::Greedy => LlamaSampler::greedy(),
        });
    LlamaSampler::chain_simple(stages)
}

/// Context size for one request: the prompt plus its token budget, capped at `cap`
fn context_window(prompt_len: usize, max_new_tokens: usize, cap: usize) -> Result<usize> {
    let n_ctx = prompt_len.saturating_add(max_new_tokens).min(cap);
    if prompt_len >= n_ctx {
        return Err(AdapterError::ContextOverflow {
            prompt_tokens: prompt_len,
            context_size: cap,
        });
    }
    Ok(n_ctx)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Eos,
    Limit,
    WindowFull,
}

/// Decide whether generation ends after `token`, the `generated`-th new token
fn stop_reason(
    config: &GenerationConfig,
    token: TokenId,
    generated: usize,
    sequence_len: usize,
    n_ctx: usize,
) -> Option<StopReason> {
    if config.is_eos(token) {
        Some(StopReason::Eos)
    } else if generated >= config.max_new_tokens {
        Some(StopReason::Limit)
    } else if sequence_len >= n_ctx {
        Some(StopReason::WindowFull)
    } else {
        None
    }
}

/// Tokens to decode for the next step, with the position of the first one
///
/// With the cache only the newest token is new to the context; without it the
/// whole sequence is decoded again from position 0.
fn pending_tokens<T>(sequence: &[T], use_cache: bool) -> (usize, &[T]) {
    if use_cache {
        let start = sequence.len().saturating_sub(1);
        (start, &sequence[start..])
    } else {
        (0, sequence)
    }
}

fn add_all(batch: &mut LlamaBatch, start: usize, tokens: &[LlamaToken]) -> Result<()> {
    let last = tokens.len().saturating_sub(1);
    for (i, token) in tokens.iter().enumerate() {
        batch
            .add(*token, (start + i) as i32, &[0], i == last)
            .map_err(|e| AdapterError::Generation(e.to_string()))?;
    }
    Ok(())
}

impl ChatModel for LlamaChatModel {
    fn render_chat(
        &self,
        messages: &[ChatMessage],
        add_generation_prompt: bool,
    ) -> Result<String> {
        let chat = messages
            .iter()
            .map(|m| LlamaChatMessage::new(m.role.as_str().to_string(), m.content.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AdapterError::InvalidRequest(e.to_string()))?;

        self.model
            .apply_chat_template(&self.template, &chat, add_generation_prompt)
            .map_err(|e| AdapterError::ChatTemplate(e.to_string()))
    }

    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<TokenId>> {
        let add_bos = if add_special_tokens {
            AddBos::Always
        } else {
            AddBos::Never
        };
        let tokens = self
            .model
            .str_to_token(text, add_bos)
            .map_err(|e| AdapterError::Tokenize(e.to_string()))?;
        Ok(tokens.into_iter().map(|t| t.0 as TokenId).collect())
    }

    fn decode(&self, tokens: &[TokenId], skip_special_tokens: bool) -> Result<String> {
        let bos = self.model.token_bos();
        let mut bytes = Vec::new();
        for &id in tokens {
            let token = LlamaToken::new(id as i32);
            if skip_special_tokens && (token == bos || self.model.is_eog_token(token)) {
                continue;
            }
            bytes.extend(piece_bytes(&self.model, token, !skip_special_tokens)?);
        }
        // Byte-level pieces only form valid UTF-8 once joined
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn generate(&self, input_ids: &[TokenId], config: &GenerationConfig) -> Result<Vec<TokenId>> {
        if input_ids.is_empty() {
            return Err(AdapterError::Generation("Empty prompt".to_string()));
        }

        let prompt_len = input_ids.len();
        let n_ctx = context_window(prompt_len, config.max_new_tokens, self.context_cap)?;

        let mut ctx = self.new_context(n_ctx)?;
        let mut batch = LlamaBatch::new(n_ctx, 1);

        let mut output: Vec<LlamaToken> = input_ids
            .iter()
            .map(|&id| LlamaToken::new(id as i32))
            .collect();
        add_all(&mut batch, 0, &output)?;
        ctx.decode(&mut batch)
            .map_err(|e| AdapterError::Generation(e.to_string()))?;

        let mut sampler = build_sampler(config, n_ctx);
        for token in &output {
            sampler.accept(*token);
        }

        for generated in 1..=config.max_new_tokens {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            output.push(token);

            match stop_reason(config, token.0 as TokenId, generated, output.len(), n_ctx) {
                Some(StopReason::WindowFull) => {
                    tracing::warn!("Context window of {} tokens is full, stopping", n_ctx);
                    break;
                }
                Some(_) => break,
                None => {}
            }

            batch.clear();
            if !config.use_cache {
                ctx.clear_kv_cache();
            }
            let (start, pending) = pending_tokens(&output, config.use_cache);
            add_all(&mut batch, start, pending)?;
            ctx.decode(&mut batch)
                .map_err(|e| AdapterError::Generation(e.to_string()))?;
        }

        Ok(output.into_iter().map(|t| t.0 as TokenId).collect())
    }

    fn special_tokens(&self) -> &SpecialTokens {
        &self.special
    }
}
