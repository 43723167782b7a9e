//! Message display component

use crate::types::message::ConversationTurn;
use dioxus::prelude::*;

#[component]
pub fn MessageBubble(turn: ConversationTurn) -> Element {
    // User turns sit on the right, assistant turns on the left
    let align = if turn.is_user() { "flex-end" } else { "flex-start" };
    let time = turn.timestamp.format("%H:%M").to_string();

    rsx! {
        div {
            style: "display: flex; flex-direction: column; align-items: {align}; margin: 6px 0;",
            div {
                style: "max-width: 75%; padding: 8px 12px; border-radius: 12px; white-space: pre-wrap; background: rgba(127, 127, 127, 0.15);",
                "{turn.text}"
            }
            span {
                style: "font-size: 11px; opacity: 0.5;",
                "{time}"
            }
        }
    }
}
