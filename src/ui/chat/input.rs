//! Chat input component

use dioxus::prelude::*;

#[component]
pub fn ChatInput(
    on_send: EventHandler<String>,
    on_stop: EventHandler<()>,
    accepting: bool,
    is_generating: bool,
) -> Element {
    let mut text = use_signal(String::new);

    let handle_keydown = move |evt: KeyboardEvent| {
        if evt.key() == Key::Escape && is_generating {
            on_stop.call(());
        } else if evt.key() == Key::Enter && !evt.modifiers().contains(Modifiers::SHIFT) {
            evt.prevent_default();
            if accepting && !text().trim().is_empty() {
                on_send.call(text());
                text.set(String::new());
            }
        }
    };

    let can_send = accepting && !text().trim().is_empty();
    let placeholder = if accepting { "Ask a question..." } else { "Please wait..." };

    rsx! {
        div {
            style: "display: flex; gap: 8px; padding: 12px;",

            textarea {
                style: "flex: 1; resize: none;",
                rows: "2",
                placeholder: "{placeholder}",
                value: "{text}",
                oninput: move |evt| text.set(evt.value()),
                onkeydown: handle_keydown,
                disabled: !accepting,
            }

            if is_generating {
                button {
                    onclick: move |_| on_stop.call(()),
                    title: "Stop (Esc)",
                    "Stop"
                }
            } else {
                button {
                    onclick: move |_| {
                        if can_send {
                            on_send.call(text());
                            text.set(String::new());
                        }
                    },
                    disabled: !can_send,
                    title: "Send (Enter)",
                    "Send"
                }
            }
        }
    }
}
