//! Conversation state
//!
//! `ConversationSession` owns the turn list and the single pending assistant
//! reply. It performs no I/O; the controller feeds it submissions, fragments
//! and stream ends in order.

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::inference::streaming::StreamEnd;
use crate::session::prompt::build_prompt;
use crate::types::message::{ConversationTurn, Role};

/// Text shown in the assistant turn until the first fragment arrives
pub const PLACEHOLDER_TEXT: &str = "...";

/// Progress of the one-shot model load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

/// Turn-taking state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
}

/// Read-only view published to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub turns: Vec<ConversationTurn>,
    pub accepting_input: bool,
    pub load_state: LoadState,
}

impl SessionSnapshot {
    pub fn is_generating(&self) -> bool {
        !self.accepting_input && self.load_state == LoadState::Ready
    }
}

/// Handed out for an accepted submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTicket {
    /// Id of the pending assistant turn
    pub reply_id: Uuid,
    /// Serialized prompt covering the whole conversation
    pub prompt: String,
}

#[derive(Debug)]
struct PendingReply {
    turn: ConversationTurn,
    revealed: bool,
    received_fragment: bool,
}

#[derive(Debug)]
pub struct ConversationSession {
    system_prompt: String,
    turns: Vec<ConversationTurn>,
    pending: Option<PendingReply>,
    load_state: LoadState,
}

impl ConversationSession {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            turns: Vec::new(),
            pending: None,
            load_state: LoadState::Loading,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.pending.is_some() {
            SessionState::AwaitingResponse
        } else {
            SessionState::Idle
        }
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    /// True when the model is loaded and no reply is pending
    pub fn accepting_input(&self) -> bool {
        self.load_state == LoadState::Ready && self.pending.is_none()
    }

    pub fn mark_ready(&mut self) {
        if self.load_state == LoadState::Loading {
            self.load_state = LoadState::Ready;
        }
    }

    pub fn mark_load_failed(&mut self, reason: impl Into<String>) {
        self.load_state = LoadState::Failed(reason.into());
    }

    /// Committed turns, excluding the pending reply
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn pending_turn(&self) -> Option<&ConversationTurn> {
        self.pending.as_ref().map(|p| &p.turn)
    }

    /// Start a new exchange.
    ///
    /// Returns `None` without touching the conversation if input is not
    /// accepted or the text is blank. `reveal_now` controls whether the
    /// placeholder reply is visible immediately.
    pub fn submit_user_message(
        &mut self,
        text: &str,
        now: DateTime<Local>,
        reveal_now: bool,
    ) -> Option<ReplyTicket> {
        if !self.accepting_input() {
            tracing::debug!("Ignoring submission while not accepting input");
            return None;
        }
        if text.trim().is_empty() {
            return None;
        }

        self.turns.push(ConversationTurn::at(Role::User, text, now));

        let reply = ConversationTurn::at(Role::Assistant, PLACEHOLDER_TEXT, now);
        let reply_id = reply.id;
        let prompt = build_prompt(&self.system_prompt, &self.turns, text);

        self.pending = Some(PendingReply {
            turn: reply,
            revealed: reveal_now,
            received_fragment: false,
        });

        tracing::debug!(
            "Accepted user turn #{} ({} prompt bytes)",
            self.turns.len(),
            prompt.len()
        );
        Some(ReplyTicket { reply_id, prompt })
    }

    /// Make the pending placeholder visible
    pub fn reveal_placeholder(&mut self, reply_id: Uuid) -> bool {
        match self.pending_mut(reply_id) {
            Some(pending) if !pending.revealed => {
                pending.revealed = true;
                true
            }
            _ => false,
        }
    }

    /// Append one streamed fragment to the pending reply.
    ///
    /// The first fragment replaces the placeholder. Leading whitespace is
    /// dropped until the reply has visible text. Returns false for stale ids.
    pub fn apply_fragment(&mut self, reply_id: Uuid, fragment: &str) -> bool {
        let Some(pending) = self.pending_mut(reply_id) else {
            return false;
        };

        if !pending.received_fragment {
            pending.turn.text.clear();
            pending.received_fragment = true;
        }

        if pending.turn.text.is_empty() {
            pending.turn.text.push_str(fragment.trim_start());
        } else {
            pending.turn.text.push_str(fragment);
        }
        true
    }

    /// Commit the pending reply and reopen the gate
    pub fn finish(&mut self, reply_id: Uuid, end: &StreamEnd) -> bool {
        if self.pending_mut(reply_id).is_none() {
            return false;
        }
        let Some(mut pending) = self.pending.take() else {
            return false;
        };

        if !pending.received_fragment {
            pending.turn.text.clear();
        }

        match end {
            StreamEnd::Completed => {
                tracing::debug!("Reply completed ({} chars)", pending.turn.text.len())
            }
            StreamEnd::Cancelled => {
                tracing::info!("Reply cancelled ({} chars kept)", pending.turn.text.len())
            }
            StreamEnd::Failed(reason) => tracing::warn!(
                "Reply ended early: {} ({} chars kept)",
                reason,
                pending.turn.text.len()
            ),
        }

        self.turns.push(pending.turn);
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut turns = self.turns.clone();
        if let Some(pending) = self.pending.as_ref().filter(|p| p.revealed) {
            turns.push(pending.turn.clone());
        }
        SessionSnapshot {
            turns,
            accepting_input: self.accepting_input(),
            load_state: self.load_state.clone(),
        }
    }

    fn pending_mut(&mut self, reply_id: Uuid) -> Option<&mut PendingReply> {
        self.pending.as_mut().filter(|p| p.turn.id == reply_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_session() -> ConversationSession {
        let mut session = ConversationSession::new("S");
        session.mark_ready();
        session
    }

    #[test]
    fn test_not_accepting_before_ready() {
        let mut session = ConversationSession::new("S");
        assert!(!session.accepting_input());
        assert!(session.submit_user_message("hi", Local::now(), true).is_none());
        assert!(session.turns().is_empty());
    }

    #[test]
    fn test_submit_appends_user_turn_and_placeholder() {
        let mut session = ready_session();
        let ticket = session.submit_user_message("2+2?", Local::now(), true).unwrap();

        assert_eq!(session.state(), SessionState::AwaitingResponse);
        assert!(!session.accepting_input());
        assert_eq!(session.turns().len(), 1);
        assert_eq!(session.turns()[0].role, Role::User);
        assert_eq!(session.pending_turn().unwrap().text, PLACEHOLDER_TEXT);
        assert!(ticket.prompt.contains("user<|end_header_id|>\n2+2?"));
        assert!(ticket.prompt.ends_with("assistant<|end_header_id|>"));
    }

    #[test]
    fn test_second_submit_while_pending_is_ignored() {
        let mut session = ready_session();
        session.submit_user_message("first", Local::now(), true).unwrap();

        assert!(session.submit_user_message("second", Local::now(), true).is_none());
        assert_eq!(session.turns().len(), 1);
    }

    #[test]
    fn test_fragments_accumulate_with_leading_whitespace_trimmed() {
        let mut session = ready_session();
        let ticket = session.submit_user_message("hi", Local::now(), true).unwrap();

        for fragment in ["", "Hello", " world"] {
            assert!(session.apply_fragment(ticket.reply_id, fragment));
        }
        session.finish(ticket.reply_id, &StreamEnd::Completed);

        let reply = session.turns().last().unwrap();
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.text, "Hello world");
        assert!(session.accepting_input());
    }

    #[test]
    fn test_first_fragment_whitespace_only() {
        let mut session = ready_session();
        let ticket = session.submit_user_message("hi", Local::now(), true).unwrap();

        session.apply_fragment(ticket.reply_id, "\n\n");
        assert_eq!(session.pending_turn().unwrap().text, "");
        session.apply_fragment(ticket.reply_id, " Four");
        session.apply_fragment(ticket.reply_id, "  spaces kept");
        assert_eq!(session.pending_turn().unwrap().text, "Four  spaces kept");
    }

    #[test]
    fn test_stale_reply_ids_are_ignored() {
        let mut session = ready_session();
        let ticket = session.submit_user_message("hi", Local::now(), true).unwrap();
        let stale = Uuid::new_v4();

        assert!(!session.apply_fragment(stale, "x"));
        assert!(!session.finish(stale, &StreamEnd::Completed));
        assert_eq!(session.pending_turn().unwrap().id, ticket.reply_id);
    }

    #[test]
    fn test_failed_stream_keeps_partial_text() {
        let mut session = ready_session();
        let ticket = session.submit_user_message("hi", Local::now(), true).unwrap();

        session.apply_fragment(ticket.reply_id, "partial");
        session.finish(ticket.reply_id, &StreamEnd::Failed("step 2".into()));

        assert_eq!(session.turns().last().unwrap().text, "partial");
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_reply_without_fragments_drops_placeholder() {
        let mut session = ready_session();
        let ticket = session.submit_user_message("hi", Local::now(), true).unwrap();

        session.finish(ticket.reply_id, &StreamEnd::Cancelled);
        assert_eq!(session.turns().last().unwrap().text, "");
        assert!(session.accepting_input());
    }

    #[test]
    fn test_placeholder_hidden_until_revealed() {
        let mut session = ready_session();
        let ticket = session.submit_user_message("hi", Local::now(), false).unwrap();

        assert_eq!(session.snapshot().turns.len(), 1);
        assert!(session.reveal_placeholder(ticket.reply_id));
        assert!(!session.reveal_placeholder(ticket.reply_id));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.turns.len(), 2);
        assert_eq!(snapshot.turns[1].text, PLACEHOLDER_TEXT);
    }

    #[test]
    fn test_finish_commits_unrevealed_reply() {
        let mut session = ready_session();
        let ticket = session.submit_user_message("hi", Local::now(), false).unwrap();

        session.apply_fragment(ticket.reply_id, "done");
        session.finish(ticket.reply_id, &StreamEnd::Completed);
        assert_eq!(session.snapshot().turns.len(), 2);
    }

    #[test]
    fn test_history_prompt_includes_previous_exchange() {
        let mut session = ready_session();
        let first = session.submit_user_message("2+2?", Local::now(), true).unwrap();
        session.apply_fragment(first.reply_id, "4");
        session.finish(first.reply_id, &StreamEnd::Completed);

        let second = session.submit_user_message("3+3?", Local::now(), true).unwrap();
        assert!(second.prompt.contains("assistant<|end_header_id|>\n4<|eot_id|>"));
        assert_eq!(second.prompt.matches("<|start_header_id|>").count(), 5);
    }

    #[test]
    fn test_load_failure_never_accepts() {
        let mut session = ConversationSession::new("S");
        session.mark_load_failed("missing model");
        session.mark_ready();

        assert!(!session.accepting_input());
        assert!(matches!(session.load_state(), LoadState::Failed(_)));
        assert!(!session.snapshot().is_generating());
    }

    #[test]
    fn test_blank_text_is_ignored() {
        let mut session = ready_session();
        assert!(session.submit_user_message("   ", Local::now(), true).is_none());
        assert!(session.accepting_input());
    }
}
