//! Chat interface components
//!
//! Contains the main chat view, message display, and input components.

pub mod input;
pub mod message;

use dioxus::prelude::*;
use input::ChatInput;
use message::MessageBubble;

use crate::app::AppState;
use crate::session::LoadState;

#[component]
pub fn ChatView() -> Element {
    let app_state = use_context::<AppState>();
    let snapshot = app_state.snapshot.read().clone();

    let status = match &snapshot.load_state {
        LoadState::Loading => "Loading model...".to_string(),
        LoadState::Ready => String::new(),
        LoadState::Failed(reason) => format!("Failed to load model: {reason}"),
    };
    let show_status = !status.is_empty();
    let is_generating = snapshot.is_generating();

    let send_session = app_state.session.clone();
    let stop_session = app_state.session.clone();

    rsx! {
        div {
            style: "display: flex; flex-direction: column; height: 100vh; font-family: sans-serif;",

            if show_status {
                p {
                    style: "text-align: center; opacity: 0.6;",
                    "{status}"
                }
            }

            div {
                style: "flex: 1; overflow-y: auto; padding: 12px;",
                for turn in snapshot.turns.iter() {
                    MessageBubble { key: "{turn.id}", turn: turn.clone() }
                }
            }

            ChatInput {
                on_send: move |text: String| send_session.submit(text),
                on_stop: move |_| stop_session.cancel(),
                accepting: snapshot.accepting_input,
                is_generating,
            }
        }
    }
}
