//! Error types
//!
//! Every failure in the adapter surfaces as an [`AdapterError`]. Nothing is retried
//! or recovered locally; the host decides how to report it.

use thiserror::Error;

/// Adapter errors
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Download failed: {0}")]
    Download(String),
    #[error("Backend initialization failed: {0}")]
    Backend(String),
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Chat template error: {0}")]
    ChatTemplate(String),
    #[error("Tokenization failed: {0}")]
    Tokenize(String),
    #[error("Decoding failed: {0}")]
    Decode(String),
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("Prompt of {prompt_tokens} tokens does not fit a context window of {context_size}")]
    ContextOverflow {
        prompt_tokens: usize,
        context_size: usize,
    },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_overflow_message() {
        let err = AdapterError::ContextOverflow {
            prompt_tokens: 5000,
            context_size: 4096,
        };
        assert_eq!(
            err.to_string(),
            "Prompt of 5000 tokens does not fit a context window of 4096"
        );
    }

    #[test]
    fn test_json_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: AdapterError = parse.unwrap_err().into();
        assert!(matches!(err, AdapterError::Json(_)));
    }
}
