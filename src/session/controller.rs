//! Session controller
//!
//! A single task owns the `ConversationSession` and applies every change in
//! mailbox order: user submissions, streamed fragments, stream ends, the load
//! result. Observers only ever see published snapshots.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::inference::backend::{LoadError, ModelLoader};
use crate::inference::engine::InferenceEngine;
use crate::inference::streaming::{FragmentStream, StreamEnd};
use crate::session::conversation::{ConversationSession, SessionSnapshot};
use crate::session::lifecycle::LoadLifecycle;
use crate::storage::settings::DEFAULT_SYSTEM_PROMPT;

/// Session behaviour settings
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Instruction placed at the top of every prompt
    pub system_prompt: String,
    /// How long the "..." placeholder stays hidden after a submission
    pub placeholder_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            placeholder_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
enum Command {
    Submit(String),
    Cancel,
    Reveal(Uuid),
    Fragment { reply_id: Uuid, text: String },
    Finished { reply_id: Uuid, end: StreamEnd },
    Loaded(Result<(), LoadError>),
}

/// Cloneable front door to a running session
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Submit a user message; ignored while a reply is pending
    pub fn submit(&self, text: impl Into<String>) {
        if self.tx.send(Command::Submit(text.into())).is_err() {
            tracing::warn!("Session controller is gone, dropping submission");
        }
    }

    /// Stop the reply currently being generated, if any
    pub fn cancel(&self) {
        let _ = self.tx.send(Command::Cancel);
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait until a published snapshot satisfies `predicate`
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|s| predicate(s)).await.map(|s| (*s).clone());
        result.unwrap_or_else(|_| self.snapshot())
    }
}

/// Owns the conversation and drives generation
pub struct SessionController<L: ModelLoader> {
    engine: Arc<InferenceEngine<L>>,
    session: ConversationSession,
    config: SessionConfig,
    /// Weak so the controller stops once every handle is dropped
    mailbox: mpsc::WeakUnboundedSender<Command>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    current: Option<(Uuid, CancellationToken)>,
}

impl<L: ModelLoader> SessionController<L> {
    /// Start the model load and the controller task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(engine: Arc<InferenceEngine<L>>, config: SessionConfig) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ConversationSession::new(config.system_prompt.clone());
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        let ready = LoadLifecycle::new(Arc::clone(&engine)).start();
        let loaded_tx = tx.clone();
        tokio::spawn(async move {
            let _ = loaded_tx.send(Command::Loaded(ready.wait().await));
        });

        let controller = SessionController {
            engine,
            session,
            config,
            mailbox: tx.downgrade(),
            snapshot_tx,
            current: None,
        };
        tokio::spawn(controller.run(rx));

        SessionHandle {
            tx,
            snapshot: snapshot_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            if self.handle(command) {
                self.snapshot_tx.send_replace(self.session.snapshot());
            }
        }

        if let Some((_, cancel)) = self.current.take() {
            cancel.cancel();
        }
        tracing::debug!("Session controller stopped");
    }

    /// Apply one command; returns true if observers need a new snapshot
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Submit(text) => self.start_reply(&text),
            Command::Cancel => {
                if let Some((_, cancel)) = &self.current {
                    tracing::info!("Cancelling current reply");
                    cancel.cancel();
                }
                false
            }
            Command::Reveal(reply_id) => self.session.reveal_placeholder(reply_id),
            Command::Fragment { reply_id, text } => self.session.apply_fragment(reply_id, &text),
            Command::Finished { reply_id, end } => {
                if self.current.as_ref().is_some_and(|(id, _)| *id == reply_id) {
                    self.current = None;
                }
                self.session.finish(reply_id, &end)
            }
            Command::Loaded(Ok(())) => {
                self.session.mark_ready();
                true
            }
            Command::Loaded(Err(e)) => {
                self.session.mark_load_failed(e.to_string());
                true
            }
        }
    }

    fn start_reply(&mut self, text: &str) -> bool {
        let reveal_now = self.config.placeholder_delay.is_zero();
        let Some(ticket) = self.session.submit_user_message(text, Local::now(), reveal_now) else {
            return false;
        };
        let Some(tx) = self.mailbox.upgrade() else {
            return true;
        };

        if !reveal_now {
            let tx = tx.clone();
            let delay = self.config.placeholder_delay;
            let reply_id = ticket.reply_id;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Command::Reveal(reply_id));
            });
        }

        let cancel = CancellationToken::new();
        match self.engine.infer_streaming(&ticket.prompt, cancel.clone()) {
            Ok(stream) => {
                self.current = Some((ticket.reply_id, cancel));
                tokio::spawn(forward_fragments(ticket.reply_id, stream, tx));
            }
            Err(e) => {
                tracing::warn!("Generation request rejected: {}", e);
                self.session
                    .finish(ticket.reply_id, &StreamEnd::Failed(e.to_string()));
            }
        }
        true
    }
}

/// Pull fragments and post them, then the end reason, to the controller
async fn forward_fragments(
    reply_id: Uuid,
    mut stream: FragmentStream,
    tx: mpsc::UnboundedSender<Command>,
) {
    while let Some(text) = stream.next().await {
        if tx.send(Command::Fragment { reply_id, text }).is_err() {
            return;
        }
    }

    let end = stream.end().cloned().unwrap_or(StreamEnd::Completed);
    let _ = tx.send(Command::Finished { reply_id, end });
}
