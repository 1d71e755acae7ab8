//! LLM inference
//!
//! Adapter lifecycle plus the llama.cpp binding it drives.

pub mod adapter;
pub mod backend;
pub mod llama;

pub use adapter::{strip_eos, LoadedAdapter, ModelAdapter};
pub use backend::ChatModel;
pub use llama::LlamaChatModel;
