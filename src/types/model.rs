//! Model types
//!
//! Special-token table and load-time placement of a checkpoint.

use crate::types::config::Precision;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Token id as exposed by a tokenizer vocabulary
pub type TokenId = u32;

/// Special tokens read from the tokenizer at load time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    /// End-of-sequence token id
    pub eos_token_id: Option<TokenId>,
    /// End-of-sequence marker as it appears in decoded text
    pub eos_token: String,
    /// Padding token id, if the tokenizer defines one
    pub pad_token_id: Option<TokenId>,
}

/// Where and how a checkpoint was placed when it was loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    /// Accelerator description, e.g. "NVIDIA A100-SXM4-80GB" or "cpu"
    pub accelerator: String,
    /// Number of layers offloaded to the accelerator
    pub gpu_layers: u32,
    /// Precision the checkpoint was selected for
    pub precision: Precision,
}

impl Placement {
    pub fn cpu(precision: Precision) -> Self {
        Self {
            accelerator: "cpu".to_string(),
            gpu_layers: 0,
            precision,
        }
    }

    pub fn is_offloaded(&self) -> bool {
        self.gpu_layers > 0
    }
}

/// Information about a loaded model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Repository identifier the checkpoint was resolved from
    pub repo_id: String,
    /// Path to the GGUF file
    pub path: PathBuf,
    /// Model size in bytes
    pub size_bytes: u64,
    /// Number of parameters
    pub parameters: u64,
    /// Context length the model was trained with
    pub context_length: u32,
}
