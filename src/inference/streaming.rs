//! Fragment streaming
//!
//! The generation worker hands fragments over a capacity-1 channel, so it
//! never runs more than one step ahead of the consumer.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Messages sent from the generation worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamToken {
    /// Newly decoded text for one generated token (may be empty)
    Fragment(String),
    /// Generation stopped; no further tokens follow
    Finished(StreamEnd),
}

/// Why a fragment stream stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The model produced an end-of-generation token or hit the length budget
    Completed,
    /// Cancellation was requested
    Cancelled,
    /// A step failed; fragments already yielded remain valid
    Failed(String),
}

impl StreamEnd {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamEnd::Cancelled)
    }
}

/// Lazy, cancellable sequence of decoded fragments for one prompt.
///
/// Not restartable: once `next` returns `None` it keeps returning `None`.
#[derive(Debug)]
pub struct FragmentStream {
    rx: mpsc::Receiver<StreamToken>,
    cancel: CancellationToken,
    end: Option<StreamEnd>,
}

impl FragmentStream {
    pub(crate) fn new(rx: mpsc::Receiver<StreamToken>, cancel: CancellationToken) -> Self {
        Self {
            rx,
            cancel,
            end: None,
        }
    }

    /// Wait for the next fragment.
    ///
    /// Returns `None` when the stream ended. Cancellation is honoured before
    /// any buffered fragment is handed out, but the stream only reports its
    /// end once the worker has stopped and released the engine.
    pub async fn next(&mut self) -> Option<String> {
        if self.end.is_some() {
            return None;
        }

        if self.cancel.is_cancelled() {
            self.wait_for_worker().await;
            self.finish(StreamEnd::Cancelled);
            return None;
        }

        let received = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            token = self.rx.recv() => Some(token),
        };

        let Some(token) = received else {
            self.wait_for_worker().await;
            self.finish(StreamEnd::Cancelled);
            return None;
        };

        match token {
            Some(StreamToken::Fragment(text)) => Some(text),
            Some(StreamToken::Finished(end)) => {
                self.finish(end);
                None
            }
            None => {
                self.finish(StreamEnd::Failed(
                    "generation worker exited without finishing".to_string(),
                ));
                None
            }
        }
    }

    /// Termination reason, available once `next` returned `None`
    pub fn end(&self) -> Option<&StreamEnd> {
        self.end.as_ref()
    }

    /// Drain the stream, concatenating every fragment
    pub async fn collect_text(&mut self) -> String {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment);
        }
        text
    }

    /// Discard fragments until the worker reports its end or goes away
    async fn wait_for_worker(&mut self) {
        while let Some(token) = self.rx.recv().await {
            if let StreamToken::Finished(end) = token {
                tracing::debug!("Worker stopped after cancellation: {:?}", end);
                break;
            }
        }
    }

    fn finish(&mut self, end: StreamEnd) {
        if self.end.is_none() {
            tracing::debug!("Fragment stream ended: {:?}", end);
            self.end = Some(end);
        }
        // Unblocks a worker waiting on the hand-off
        self.rx.close();
    }
}
