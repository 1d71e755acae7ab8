//! Model backend seam
//!
//! The adapter only sequences calls; everything model-specific goes through
//! [`ChatModel`].

use crate::error::Result;
use crate::types::generation::GenerationConfig;
use crate::types::message::ChatMessage;
use crate::types::model::{SpecialTokens, TokenId};

/// A tokenizer plus causal language model pair
///
/// Implementations are shared read-only across concurrent requests.
pub trait ChatModel: Send + Sync {
    /// Render a conversation with the model's chat template.
    ///
    /// With `add_generation_prompt` the result ends with the marker that opens an
    /// assistant turn.
    fn render_chat(&self, messages: &[ChatMessage], add_generation_prompt: bool)
        -> Result<String>;

    /// Convert text to token ids
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<TokenId>>;

    /// Convert token ids to text
    fn decode(&self, tokens: &[TokenId], skip_special_tokens: bool) -> Result<String>;

    /// Run generation.
    ///
    /// Returns `input_ids` followed by the newly generated ids. A stop token that ended
    /// generation is kept at the end.
    fn generate(&self, input_ids: &[TokenId], config: &GenerationConfig) -> Result<Vec<TokenId>>;

    fn special_tokens(&self) -> &SpecialTokens;
}
