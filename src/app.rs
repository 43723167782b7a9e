//! Root Dioxus application component
//!
//! Bridges the session's snapshot channel into a signal the UI tree reads.

use crate::session::{SessionHandle, SessionSnapshot};
use crate::ui::chat::ChatView;
use dioxus::prelude::*;

/// Application state shared across components
#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    /// Latest published session snapshot
    pub snapshot: Signal<SessionSnapshot>,
}

#[component]
pub fn App() -> Element {
    let session = use_context::<SessionHandle>();
    let snapshot = use_signal(|| session.snapshot());
    use_context_provider(|| AppState {
        session: session.clone(),
        snapshot,
    });

    use_future(move || {
        let mut rx = session.subscribe();
        let mut snapshot = snapshot;
        async move {
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                snapshot.set(next);
            }
            tracing::debug!("Session snapshot channel closed");
        }
    });

    rsx! {
        ChatView {}
    }
}
