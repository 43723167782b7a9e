//! Model collaborator capabilities
//!
//! The engine never talks to a concrete runtime directly. Anything that can
//! load a model, tokenize text, decode tokens incrementally and run single
//! generation steps can drive a chat session.

use std::path::Path;

use thiserror::Error;

use crate::inference::engine::{EngineConfig, GenerationParams};

/// Token identifier as produced by the tokenizer
pub type TokenId = i32;

/// Errors that can occur while loading a model or its tokenizer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("Failed to load model: {0}")]
    Model(String),

    #[error("Failed to load tokenizer: {0}")]
    Tokenizer(String),

    #[error("Load worker error: {0}")]
    Worker(String),
}

/// Errors raised by a single tokenizer or generation operation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    #[error("Failed to create generator: {0}")]
    Generator(String),

    #[error("Generation step failed: {0}")]
    Step(String),
}

/// Stateful decoder turning tokens into text one at a time.
///
/// Some tokens only resolve to visible text once the following token is
/// known, so implementations carry state between calls.
pub trait DecodeStream {
    /// Decode one token; may return an empty string while bytes are pending
    fn decode(&mut self, token: TokenId) -> Result<String, BackendError>;

    /// Text still held back once generation is over
    fn flush(&mut self) -> String;
}

/// Text <-> token conversion
pub trait Tokenizer: Send + Sync {
    type Decoder: DecodeStream;

    fn encode(&self, text: &str) -> Result<Vec<TokenId>, BackendError>;

    fn decode_stream(&self) -> Self::Decoder;
}

/// Step-wise token generator for one request
pub trait Generator {
    /// True once an end-of-generation token was appended or the length budget is spent
    fn is_done(&self) -> bool;

    /// Evaluate the model on the pending tokens
    fn compute_next_step_scores(&mut self) -> Result<(), BackendError>;

    /// Select the next token from the latest scores and append it
    fn append_next_token(&mut self) -> Result<(), BackendError>;

    /// Prompt tokens followed by every generated token so far
    fn current_sequence(&self) -> &[TokenId];
}

/// Opens models from disk
pub trait ModelLoader: Send + Sync + 'static {
    type Model: ModelBackend;

    fn load_model(&self, path: &Path, config: &EngineConfig) -> Result<Self::Model, LoadError>;
}

/// A loaded model able to spawn generators.
///
/// Implementations must be shareable across threads: the engine hands the
/// model to a per-call worker thread while keeping ownership itself.
pub trait ModelBackend: Send + Sync + Sized + 'static {
    type Tokenizer: Tokenizer + 'static;
    type Generator<'m>: Generator
    where
        Self: 'm;

    fn load_tokenizer(&self) -> Result<Self::Tokenizer, LoadError>;

    fn create_generator<'m>(
        &'m self,
        params: &GenerationParams,
        input: &[TokenId],
    ) -> Result<Self::Generator<'m>, BackendError>;
}
