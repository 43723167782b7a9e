//! Scripted model backend for tests
//!
//! Generates a fixed list of tokens whose decoded bytes are known up front.
//! Prompt tokens are the prompt's bytes offset past the scripted vocabulary.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::inference::backend::{
    BackendError, DecodeStream, Generator, LoadError, ModelBackend, ModelLoader, TokenId,
    Tokenizer,
};
use crate::inference::decode::Utf8Buffer;
use crate::inference::engine::{EngineConfig, GenerationParams};

const PROMPT_TOKEN_BASE: TokenId = 100_000;

#[derive(Clone)]
pub(crate) struct ScriptedLoader {
    vocab: Arc<Vec<Vec<u8>>>,
    fail_at_step: Option<usize>,
    fail_load: bool,
    step_delay: Duration,
    loads: Arc<AtomicUsize>,
    steps: Arc<AtomicUsize>,
}

impl ScriptedLoader {
    pub(crate) fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_bytes(
            fragments
                .into_iter()
                .map(|s| s.into().into_bytes())
                .collect(),
        )
    }

    pub(crate) fn from_bytes(vocab: Vec<Vec<u8>>) -> Self {
        Self {
            vocab: Arc::new(vocab),
            fail_at_step: None,
            fail_load: false,
            step_delay: Duration::ZERO,
            loads: Arc::new(AtomicUsize::new(0)),
            steps: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn failing_load() -> Self {
        let mut loader = Self::from_bytes(Vec::new());
        loader.fail_load = true;
        loader
    }

    /// Make the given 1-based step fail
    pub(crate) fn fail_at_step(mut self, step: usize) -> Self {
        self.fail_at_step = Some(step);
        self
    }

    pub(crate) fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub(crate) fn load_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.loads)
    }

    /// Counts completed scoring steps across all generators
    pub(crate) fn step_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.steps)
    }
}

impl ModelLoader for ScriptedLoader {
    type Model = ScriptedModel;

    fn load_model(&self, path: &Path, _config: &EngineConfig) -> Result<ScriptedModel, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(LoadError::Model(format!("scripted failure for {:?}", path)));
        }
        Ok(ScriptedModel {
            script: self.clone(),
        })
    }
}

pub(crate) struct ScriptedModel {
    script: ScriptedLoader,
}

impl ModelBackend for ScriptedModel {
    type Tokenizer = ScriptedTokenizer;
    type Generator<'m> = ScriptedGenerator<'m>;

    fn load_tokenizer(&self) -> Result<ScriptedTokenizer, LoadError> {
        Ok(ScriptedTokenizer {
            vocab: Arc::clone(&self.script.vocab),
        })
    }

    fn create_generator<'m>(
        &'m self,
        params: &GenerationParams,
        input: &[TokenId],
    ) -> Result<ScriptedGenerator<'m>, BackendError> {
        Ok(ScriptedGenerator {
            script: &self.script,
            sequence: input.to_vec(),
            next: 0,
            max_length: params.max_length,
            scored: false,
        })
    }
}

pub(crate) struct ScriptedTokenizer {
    vocab: Arc<Vec<Vec<u8>>>,
}

impl Tokenizer for ScriptedTokenizer {
    type Decoder = ScriptedDecoder;

    fn encode(&self, text: &str) -> Result<Vec<TokenId>, BackendError> {
        Ok(text.bytes().map(|b| PROMPT_TOKEN_BASE + TokenId::from(b)).collect())
    }

    fn decode_stream(&self) -> ScriptedDecoder {
        ScriptedDecoder {
            vocab: Arc::clone(&self.vocab),
            buffer: Utf8Buffer::new(),
        }
    }
}

pub(crate) struct ScriptedDecoder {
    vocab: Arc<Vec<Vec<u8>>>,
    buffer: Utf8Buffer,
}

impl DecodeStream for ScriptedDecoder {
    fn decode(&mut self, token: TokenId) -> Result<String, BackendError> {
        let bytes = usize::try_from(token)
            .ok()
            .and_then(|i| self.vocab.get(i))
            .ok_or_else(|| BackendError::Decode(format!("unknown token {token}")))?;
        Ok(self.buffer.push(bytes))
    }

    fn flush(&mut self) -> String {
        self.buffer.flush()
    }
}

pub(crate) struct ScriptedGenerator<'m> {
    script: &'m ScriptedLoader,
    sequence: Vec<TokenId>,
    next: usize,
    max_length: usize,
    scored: bool,
}

impl Generator for ScriptedGenerator<'_> {
    fn is_done(&self) -> bool {
        self.next >= self.script.vocab.len() || self.sequence.len() >= self.max_length
    }

    fn compute_next_step_scores(&mut self) -> Result<(), BackendError> {
        if !self.script.step_delay.is_zero() {
            std::thread::sleep(self.script.step_delay);
        }
        if self.script.fail_at_step == Some(self.next + 1) {
            return Err(BackendError::Step(format!("scripted failure at step {}", self.next + 1)));
        }
        self.script.steps.fetch_add(1, Ordering::SeqCst);
        self.scored = true;
        Ok(())
    }

    fn append_next_token(&mut self) -> Result<(), BackendError> {
        if !self.scored {
            return Err(BackendError::Step("no scores computed".to_string()));
        }
        self.scored = false;
        let token = TokenId::try_from(self.next)
            .map_err(|e| BackendError::Step(e.to_string()))?;
        self.sequence.push(token);
        self.next += 1;
        Ok(())
    }

    fn current_sequence(&self) -> &[TokenId] {
        &self.sequence
    }
}
