//! Shared type definitions
//!
//! This module contains the data types shared by the session and the UI.

pub mod message;

pub use message::{ConversationTurn, Role};
