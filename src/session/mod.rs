//! Chat session
//!
//! Prompt building, turn-taking and the controller task that applies streamed
//! replies to the conversation.

pub mod controller;
pub mod conversation;
pub mod lifecycle;
pub mod prompt;

pub use controller::{SessionConfig, SessionController, SessionHandle};
pub use conversation::{
    ConversationSession, LoadState, ReplyTicket, SessionSnapshot, SessionState, PLACEHOLDER_TEXT,
};
pub use lifecycle::{LoadLifecycle, ReadySignal};
pub use prompt::{build_prompt, build_single_turn};
