//! Prompt serialization
//!
//! Renders the system instruction and the conversation turns with the
//! Llama 3 chat template. Output is a pure function of the inputs.

use crate::types::message::{ConversationTurn, Role};

pub(crate) const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
const END_OF_TURN: &str = "<|eot_id|>";

/// Build the prompt for the next assistant reply.
///
/// `history` must already end with the user turn carrying `new_user_text`;
/// the text is not serialized a second time. The prompt always ends with an
/// open, empty assistant header for the model to complete.
pub fn build_prompt(system_prompt: &str, history: &[ConversationTurn], new_user_text: &str) -> String {
    let capacity = system_prompt.len()
        + history.iter().map(|t| t.text.len() + 48).sum::<usize>()
        + 128;
    let mut prompt = String::with_capacity(capacity);

    prompt.push_str(BEGIN_OF_TEXT);
    push_segment(&mut prompt, "system", system_prompt);

    for turn in history {
        push_segment(&mut prompt, turn.role.as_str(), &turn.text);
    }

    if !history.last().is_some_and(|t| t.is_user() && t.text == new_user_text) {
        tracing::trace!("New user text is not the last history turn");
    }

    push_header(&mut prompt, Role::Assistant.as_str());
    prompt
}

/// Build a prompt for a single question with no prior conversation
pub fn build_single_turn(system_prompt: &str, user_text: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(BEGIN_OF_TEXT);
    push_segment(&mut prompt, "system", system_prompt);
    push_segment(&mut prompt, Role::User.as_str(), user_text);
    push_header(&mut prompt, Role::Assistant.as_str());
    prompt
}

fn push_header(prompt: &mut String, role: &str) {
    prompt.push_str("<|start_header_id|>");
    prompt.push_str(role);
    prompt.push_str("<|end_header_id|>");
}

fn push_segment(prompt: &mut String, role: &str, text: &str) {
    push_header(prompt, role);
    prompt.push('\n');
    prompt.push_str(text);
    prompt.push_str(END_OF_TURN);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: Role, text: &str) -> ConversationTurn {
        ConversationTurn::new(role, text)
    }

    fn count_headers(prompt: &str) -> usize {
        prompt.matches("<|start_header_id|>").count()
    }

    #[test]
    fn test_empty_history() {
        let prompt = build_prompt("S", &[], "2+2?");
        assert_eq!(
            prompt,
            "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\nS<|eot_id|>\
             <|start_header_id|>assistant<|end_header_id|>"
        );
        assert_eq!(count_headers(&prompt), 2);
    }

    #[test]
    fn test_history_roles_are_tagged_in_order() {
        let history = vec![
            turn(Role::User, "What is 2+2?"),
            turn(Role::Assistant, "4"),
            turn(Role::User, "And 3+3?"),
        ];
        let prompt = build_prompt("Be brief.", &history, "And 3+3?");

        assert_eq!(count_headers(&prompt), history.len() + 2);
        let first = prompt.find("user<|end_header_id|>\nWhat is 2+2?").unwrap();
        let second = prompt.find("assistant<|end_header_id|>\n4<|eot_id|>").unwrap();
        let third = prompt.find("user<|end_header_id|>\nAnd 3+3?").unwrap();
        assert!(first < second && second < third);
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>"));
    }

    #[test]
    fn test_new_user_text_is_not_duplicated() {
        let history = vec![turn(Role::User, "hello")];
        let prompt = build_prompt("S", &history, "hello");
        assert_eq!(prompt.matches("hello").count(), 1);
    }

    #[test]
    fn test_build_is_deterministic() {
        let history = vec![turn(Role::User, "a"), turn(Role::Assistant, "b")];
        assert_eq!(build_prompt("S", &history, "a"), build_prompt("S", &history, "a"));
    }

    #[test]
    fn test_timestamps_do_not_affect_prompt() {
        let a = vec![turn(Role::User, "x")];
        let b = vec![turn(Role::User, "x")];
        assert_eq!(build_prompt("S", &a, "x"), build_prompt("S", &b, "x"));
    }

    #[test]
    fn test_single_turn() {
        let prompt = build_single_turn("S", "hi");
        assert_eq!(prompt, build_prompt("S", &[turn(Role::User, "hi")], "hi"));
    }
}
