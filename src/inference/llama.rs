//! llama.cpp backend
//!
//! Implements the model capabilities on top of `llama-cpp-2` for GGUF files.
//! The backend and model live together in `LlamaRuntime` so the tokenizer and
//! decode streams can keep them alive independently of the engine.

use std::fs::File;
use std::io::Read;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;

use crate::inference::backend::{
    BackendError, DecodeStream, Generator, LoadError, ModelBackend, ModelLoader, TokenId,
    Tokenizer,
};
use crate::inference::decode::Utf8Buffer;
use crate::inference::engine::{EngineConfig, GenerationParams};
use crate::session::prompt::BEGIN_OF_TEXT;

/// Magic bytes at the start of every GGUF file
pub const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// Checks that `path` exists and looks like a GGUF file
pub fn validate_gguf(path: &Path) -> Result<(), LoadError> {
    if !path.exists() {
        return Err(LoadError::ModelNotFound(path.display().to_string()));
    }

    let mut magic = [0u8; 4];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map_err(|e| LoadError::Model(format!("{}: {}", path.display(), e)))?;

    if &magic != GGUF_MAGIC {
        return Err(LoadError::Model(format!(
            "{} is not a GGUF file",
            path.display()
        )));
    }
    Ok(())
}

/// Loads GGUF models through llama.cpp
#[derive(Debug, Default, Clone, Copy)]
pub struct LlamaLoader;

impl ModelLoader for LlamaLoader {
    type Model = GgufModel;

    fn load_model(&self, path: &Path, config: &EngineConfig) -> Result<GgufModel, LoadError> {
        validate_gguf(path)?;
        tracing::debug!("GGUF validation passed for {:?}", path);

        let backend = LlamaBackend::init().map_err(|e| LoadError::Model(e.to_string()))?;
        let model_params = LlamaModelParams::default().with_n_gpu_layers(config.gpu_layers);
        let model = LlamaModel::load_from_file(&backend, path, &model_params)
            .map_err(|e| LoadError::Model(e.to_string()))?;

        tracing::info!(
            "Model loaded: {} ({} params, {} vocab, {} ctx)",
            path.display(),
            model.n_params(),
            model.n_vocab(),
            model.n_ctx_train()
        );

        Ok(GgufModel {
            runtime: Arc::new(LlamaRuntime { model, backend }),
        })
    }
}

/// Model and backend, dropped in that order
struct LlamaRuntime {
    model: LlamaModel,
    backend: LlamaBackend,
}

/// A loaded GGUF model
pub struct GgufModel {
    runtime: Arc<LlamaRuntime>,
}

impl ModelBackend for GgufModel {
    type Tokenizer = GgufTokenizer;
    type Generator<'m> = GgufGenerator<'m>;

    fn load_tokenizer(&self) -> Result<GgufTokenizer, LoadError> {
        // The vocabulary ships inside the GGUF file
        if self.runtime.model.n_vocab() <= 0 {
            return Err(LoadError::Tokenizer("model has an empty vocabulary".to_string()));
        }
        Ok(GgufTokenizer {
            runtime: Arc::clone(&self.runtime),
        })
    }

    fn create_generator<'m>(
        &'m self,
        params: &GenerationParams,
        input: &[TokenId],
    ) -> Result<GgufGenerator<'m>, BackendError> {
        GgufGenerator::new(&self.runtime, params, input)
    }
}

pub struct GgufTokenizer {
    runtime: Arc<LlamaRuntime>,
}

impl Tokenizer for GgufTokenizer {
    type Decoder = GgufDecodeStream;

    fn encode(&self, text: &str) -> Result<Vec<TokenId>, BackendError> {
        let tokens = self
            .runtime
            .model
            .str_to_token(text, bos_policy(text))
            .map_err(|e| BackendError::Tokenization(e.to_string()))?;
        Ok(tokens.into_iter().map(|t| t.0).collect())
    }

    fn decode_stream(&self) -> GgufDecodeStream {
        GgufDecodeStream {
            runtime: Arc::clone(&self.runtime),
            buffer: Utf8Buffer::new(),
        }
    }
}

/// Chat prompts carry their own `<|begin_of_text|>`, parsed as the BOS token
fn bos_policy(text: &str) -> AddBos {
    if text.starts_with(BEGIN_OF_TEXT) {
        AddBos::Never
    } else {
        AddBos::Always
    }
}

/// Decodes token bytes, holding back incomplete UTF-8 sequences
pub struct GgufDecodeStream {
    runtime: Arc<LlamaRuntime>,
    buffer: Utf8Buffer,
}

impl DecodeStream for GgufDecodeStream {
    fn decode(&mut self, token: TokenId) -> Result<String, BackendError> {
        // Plaintext renders control tokens (end of turn etc.) as nothing
        let bytes = self
            .runtime
            .model
            .token_to_bytes(LlamaToken::new(token), Special::Plaintext)
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(self.buffer.push(&bytes))
    }

    fn flush(&mut self) -> String {
        self.buffer.flush()
    }
}

/// One request's llama context, sampler and token sequence
pub struct GgufGenerator<'m> {
    model: &'m LlamaModel,
    ctx: LlamaContext<'m>,
    sampler: LlamaSampler,
    sequence: Vec<TokenId>,
    /// Tokens appended but not yet evaluated
    pending: Vec<LlamaToken>,
    n_past: i32,
    logits_index: Option<i32>,
    max_length: usize,
    done: bool,
}

impl<'m> GgufGenerator<'m> {
    fn new(
        runtime: &'m LlamaRuntime,
        params: &GenerationParams,
        input: &[TokenId],
    ) -> Result<Self, BackendError> {
        if input.is_empty() {
            return Err(BackendError::Generator("empty prompt".to_string()));
        }

        // The whole prompt is evaluated in one batch
        let n_ctx = u32::try_from(params.max_length.max(input.len() + 1))
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| BackendError::Generator("invalid context size".to_string()))?;
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_batch(n_ctx.get());

        let ctx = runtime
            .model
            .new_context(&runtime.backend, ctx_params)
            .map_err(|e| BackendError::Generator(format!("Failed to create context: {}", e)))?;

        Ok(Self {
            model: &runtime.model,
            ctx,
            sampler: build_sampler(params),
            sequence: input.to_vec(),
            pending: input.iter().copied().map(LlamaToken::new).collect(),
            n_past: 0,
            logits_index: None,
            max_length: params.max_length,
            done: input.len() >= params.max_length,
        })
    }
}

impl Generator for GgufGenerator<'_> {
    fn is_done(&self) -> bool {
        self.done
    }

    fn compute_next_step_scores(&mut self) -> Result<(), BackendError> {
        if self.pending.is_empty() {
            return Err(BackendError::Step("no tokens to evaluate".to_string()));
        }

        let mut batch = LlamaBatch::new(self.pending.len(), 1);
        let last = self.pending.len() - 1;
        for (i, token) in self.pending.iter().enumerate() {
            batch
                .add(*token, self.n_past + i as i32, &[0], i == last)
                .map_err(|e| BackendError::Step(format!("Failed to add token to batch: {}", e)))?;
        }

        self.ctx
            .decode(&mut batch)
            .map_err(|e| BackendError::Step(format!("Failed to decode: {}", e)))?;

        self.n_past += self.pending.len() as i32;
        self.logits_index = Some(batch.n_tokens() - 1);
        self.pending.clear();
        Ok(())
    }

    fn append_next_token(&mut self) -> Result<(), BackendError> {
        let idx = self
            .logits_index
            .take()
            .ok_or_else(|| BackendError::Step("scores were not computed".to_string()))?;

        let token = self.sampler.sample(&self.ctx, idx);
        self.sampler.accept(token);

        self.sequence.push(token.0);
        self.pending.push(token);

        if self.model.is_eog_token(token) {
            tracing::debug!("End of generation token encountered");
            self.done = true;
        } else if self.sequence.len() >= self.max_length {
            tracing::debug!("Reached max length of {} tokens", self.max_length);
            self.done = true;
        }
        Ok(())
    }

    fn current_sequence(&self) -> &[TokenId] {
        &self.sequence
    }
}

fn build_sampler(params: &GenerationParams) -> LlamaSampler {
    let seed = if params.seed == 0 {
        rand_seed()
    } else {
        params.seed
    };

    if params.temperature < 0.01 {
        LlamaSampler::greedy()
    } else {
        LlamaSampler::chain_simple([
            LlamaSampler::top_k(params.top_k as i32),
            LlamaSampler::top_p(params.top_p, 1),
            LlamaSampler::temp(params.temperature),
            LlamaSampler::dist(seed),
        ])
    }
}

/// Generates a random seed using system entropy
fn rand_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_chat_prompt_gets_no_extra_bos() {
        let prompt = crate::session::prompt::build_single_turn("S", "hi");
        assert!(matches!(bos_policy(&prompt), AddBos::Never));
        assert!(matches!(bos_policy("plain text"), AddBos::Always));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = validate_gguf(Path::new("/definitely/not/here.gguf")).unwrap_err();
        assert!(matches!(err, LoadError::ModelNotFound(_)));
    }

    #[test]
    fn test_wrong_magic_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"ONNX-not-gguf").unwrap();

        let err = validate_gguf(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::Model(_)));
    }

    #[test]
    fn test_gguf_magic_is_accepted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"GGUF\x03\x00\x00\x00").unwrap();

        assert!(validate_gguf(file.path()).is_ok());
    }

    #[test]
    fn test_missing_model_fails_before_backend_init() {
        let config = EngineConfig::new("/definitely/not/here.gguf");
        let err = LlamaLoader
            .load_model(&config.model_path, &config)
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::ModelNotFound(_)));
    }
}
