//! chat-adapter
//!
//! Loads a pretrained causal language model checkpoint and serves chat-style
//! text generation through a two-phase `load` / `predict` lifecycle.

pub mod error;
pub mod inference;
pub mod storage;
pub mod system;
pub mod types;

pub use error::{AdapterError, Result};
pub use inference::{ChatModel, LoadedAdapter, ModelAdapter};
pub use types::config::AdapterConfig;
pub use types::request::{PredictRequest, PredictResponse};
