//! Inference engine implementation
//!
//! Owns the loaded model and tokenizer and turns a prompt into a stream of
//! decoded fragments.
//!
//! # Architecture
//!
//! Model evaluation is blocking work, so every `infer_streaming` call runs its
//! generation loop on a dedicated worker thread. The worker hands fragments to
//! the async consumer over a capacity-1 channel, which doubles as the per-token
//! yield point. Only one call may run against the model at a time.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::inference::backend::{
    BackendError, DecodeStream, Generator, LoadError, ModelBackend, ModelLoader, Tokenizer,
};
use crate::inference::streaming::{FragmentStream, StreamEnd, StreamToken};

/// Default total sequence budget (prompt plus generated tokens)
pub const DEFAULT_MAX_LENGTH: usize = 2048;

/// Errors returned when a generation request cannot start
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Model is not ready")]
    NotReady,

    #[error("A generation is already running against this model")]
    Busy,

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Worker thread error: {0}")]
    Worker(String),
}

/// Static engine configuration, fixed for the lifetime of the session
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Path to the model file
    pub model_path: PathBuf,
    /// Number of layers to offload to GPU (0 = CPU only)
    pub gpu_layers: u32,
    /// Maximum total sequence length, prompt included
    pub max_length: usize,
    /// Temperature for sampling (0.0 = greedy)
    pub temperature: f32,
    /// Top-k sampling parameter (0 = disabled)
    pub top_k: u32,
    /// Top-p (nucleus) sampling parameter
    pub top_p: f32,
    /// Random seed for sampling (0 = random)
    pub seed: u32,
}

impl EngineConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            gpu_layers: 0,
            max_length: DEFAULT_MAX_LENGTH,
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            seed: 0,
        }
    }
}

/// Per-request generation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Maximum total sequence length, prompt included
    pub max_length: usize,
    /// Number of sequences generated together
    pub batch_size: usize,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub seed: u32,
}

impl From<&EngineConfig> for GenerationParams {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_length: config.max_length,
            batch_size: 1,
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            seed: config.seed,
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from(&EngineConfig::new(PathBuf::new()))
    }
}

/// A loaded model together with its tokenizer
pub struct ModelHandle<M: ModelBackend> {
    model: M,
    tokenizer: M::Tokenizer,
}

impl<M: ModelBackend> ModelHandle<M> {
    fn open<L>(loader: &L, config: &EngineConfig) -> Result<Self, LoadError>
    where
        L: ModelLoader<Model = M>,
    {
        let model = loader.load_model(&config.model_path, config)?;
        let tokenizer = model.load_tokenizer()?;
        Ok(Self { model, tokenizer })
    }
}

impl<M: ModelBackend> Drop for ModelHandle<M> {
    fn drop(&mut self) {
        tracing::info!("Model released");
    }
}

/// The inference engine
pub struct InferenceEngine<L: ModelLoader> {
    loader: Arc<L>,
    config: EngineConfig,
    handle: OnceLock<Arc<ModelHandle<L::Model>>>,
    /// Held by the running generation worker
    in_flight: Arc<Mutex<()>>,
}

impl<L: ModelLoader> InferenceEngine<L> {
    /// Creates an engine; nothing is loaded until `initialize`
    pub fn new(loader: L, config: EngineConfig) -> Self {
        Self {
            loader: Arc::new(loader),
            config,
            handle: OnceLock::new(),
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Loads the model and its tokenizer on a blocking worker.
    ///
    /// Returns immediately if the engine is already ready. Concurrent calls
    /// are not supported; `LoadLifecycle` makes exactly one.
    pub async fn initialize(&self) -> Result<(), LoadError> {
        if self.is_ready() {
            return Ok(());
        }

        let loader = Arc::clone(&self.loader);
        let config = self.config.clone();
        let started = Instant::now();

        tracing::info!("Loading model from {:?}", config.model_path);

        let handle = tokio::task::spawn_blocking(move || ModelHandle::open(loader.as_ref(), &config))
            .await
            .map_err(|e| LoadError::Worker(e.to_string()))??;

        tracing::info!("Model loading took {} ms", started.elapsed().as_millis());

        if self.handle.set(Arc::new(handle)).is_err() {
            tracing::warn!("Model was already initialized, discarding second load");
        }
        Ok(())
    }

    /// Returns true once both model and tokenizer are loaded
    pub fn is_ready(&self) -> bool {
        self.handle.get().is_some()
    }

    /// Streams the completion of `prompt`, one fragment per generated token.
    ///
    /// The stream ends when the model finishes, after a failed step, or once
    /// `cancel` is triggered. Callers must not run two calls at once; a second
    /// call while one is still running is rejected with `EngineError::Busy`.
    pub fn infer_streaming(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, EngineError> {
        let handle = self.handle.get().cloned().ok_or(EngineError::NotReady)?;
        let guard = Arc::clone(&self.in_flight)
            .try_lock_owned()
            .map_err(|_| EngineError::Busy)?;

        let (token_tx, token_rx) = mpsc::channel(1);
        let params = GenerationParams::from(&self.config);
        let prompt = prompt.to_string();
        let worker_cancel = cancel.clone();

        thread::Builder::new()
            .name("generation".to_string())
            .spawn(move || {
                generation_worker(handle, guard, prompt, params, token_tx, worker_cancel)
            })
            .map_err(|e| EngineError::Worker(e.to_string()))?;

        Ok(FragmentStream::new(token_rx, cancel))
    }
}

/// Worker thread body: runs the loop, releases per-call state, then reports the end
fn generation_worker<M: ModelBackend>(
    handle: Arc<ModelHandle<M>>,
    guard: OwnedMutexGuard<()>,
    prompt: String,
    params: GenerationParams,
    tx: mpsc::Sender<StreamToken>,
    cancel: CancellationToken,
) {
    let end = run_generation(&handle, &prompt, &params, &tx, &cancel);
    drop(guard);
    drop(handle);
    let _ = tx.blocking_send(StreamToken::Finished(end));
}

fn run_generation<M: ModelBackend>(
    handle: &ModelHandle<M>,
    prompt: &str,
    params: &GenerationParams,
    tx: &mpsc::Sender<StreamToken>,
    cancel: &CancellationToken,
) -> StreamEnd {
    let input = match handle.tokenizer.encode(prompt) {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!("Failed to encode prompt: {}", e);
            return StreamEnd::Failed(e.to_string());
        }
    };
    tracing::debug!("Tokenized prompt into {} tokens", input.len());

    let mut generator = match handle.model.create_generator(params, &input) {
        Ok(generator) => generator,
        Err(e) => {
            tracing::warn!("Failed to start generation: {}", e);
            return StreamEnd::Failed(e.to_string());
        }
    };
    let mut decoder = handle.tokenizer.decode_stream();
    let mut produced = 0usize;

    while !generator.is_done() {
        if cancel.is_cancelled() {
            tracing::debug!("Generation cancelled after {} tokens", produced);
            return StreamEnd::Cancelled;
        }

        let fragment = match generate_step(&mut generator, &mut decoder) {
            Ok(fragment) => fragment,
            Err(e) => {
                tracing::warn!("Generation step {} failed: {}", produced + 1, e);
                return StreamEnd::Failed(e.to_string());
            }
        };

        // Blocks until the consumer pulls the previous fragment
        if tx.blocking_send(StreamToken::Fragment(fragment)).is_err() {
            tracing::debug!("Receiver dropped, stopping generation");
            return StreamEnd::Cancelled;
        }
        produced += 1;
    }

    let tail = decoder.flush();
    if !tail.is_empty() && tx.blocking_send(StreamToken::Fragment(tail)).is_err() {
        return StreamEnd::Cancelled;
    }

    tracing::debug!("Generation completed with {} tokens", produced);
    StreamEnd::Completed
}

/// Scores, appends and decodes exactly one token
fn generate_step<G: Generator, D: DecodeStream>(
    generator: &mut G,
    decoder: &mut D,
) -> Result<String, BackendError> {
    generator.compute_next_step_scores()?;
    generator.append_next_token()?;

    let token = generator
        .current_sequence()
        .last()
        .copied()
        .ok_or_else(|| BackendError::Step("generator returned an empty sequence".to_string()))?;

    decoder.decode(token)
}
