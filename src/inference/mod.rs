//! LLM inference engine
//!
//! This module handles model loading and token-by-token streaming generation.

pub mod backend;
pub mod decode;
pub mod engine;
pub mod llama;
pub mod streaming;

#[cfg(test)]
pub(crate) mod fake;

// Re-export main types for convenience
pub use backend::{BackendError, LoadError, ModelBackend, ModelLoader, TokenId};
pub use engine::{
    EngineConfig, EngineError, GenerationParams, InferenceEngine, ModelHandle, DEFAULT_MAX_LENGTH,
};
pub use llama::{validate_gguf, LlamaLoader, GGUF_MAGIC};
pub use streaming::{FragmentStream, StreamEnd, StreamToken};
