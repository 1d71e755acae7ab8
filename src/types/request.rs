//! Request and response schema

use crate::types::generation::GenerateArgs;
use crate::types::message::ChatMessage;
use serde::{Deserialize, Serialize};

/// A chat completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Conversation so far, oldest first
    pub messages: Vec<ChatMessage>,
    /// Overrides merged over the default generation options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_args: Option<GenerateArgs>,
}

impl PredictRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            generate_args: None,
        }
    }
}

/// Generated text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub output: String,
}
