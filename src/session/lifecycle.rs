//! One-shot model loading
//!
//! Loads the model on the runtime, away from the UI thread, and resolves a
//! single `ReadySignal` with the outcome. Failed loads are not retried.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::inference::backend::{LoadError, ModelLoader};
use crate::inference::engine::InferenceEngine;

/// Resolves once the model load finished
#[derive(Debug)]
pub struct ReadySignal {
    rx: oneshot::Receiver<Result<(), LoadError>>,
}

impl ReadySignal {
    pub async fn wait(self) -> Result<(), LoadError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(LoadError::Worker("load task ended without a result".to_string())))
    }
}

/// Drives `InferenceEngine::initialize` exactly once
pub struct LoadLifecycle<L: ModelLoader> {
    engine: Arc<InferenceEngine<L>>,
}

impl<L: ModelLoader> LoadLifecycle<L> {
    pub fn new(engine: Arc<InferenceEngine<L>>) -> Self {
        Self { engine }
    }

    /// Spawn the load; must be called from within a tokio runtime
    pub fn start(self) -> ReadySignal {
        let (tx, rx) = oneshot::channel();
        let engine = self.engine;

        tokio::spawn(async move {
            let result = engine.initialize().await;
            match &result {
                Ok(()) => tracing::info!("Model ready"),
                Err(e) => tracing::error!("Failed to load model: {}", e),
            }
            let _ = tx.send(result);
        });

        ReadySignal { rx }
    }
}
