//! Message types
//!
//! Defines conversation turns and roles.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Role of a turn's author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message from the user
    User,
    /// Message from the AI assistant
    Assistant,
}

impl Role {
    /// Lower-cased name used in serialized prompts
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Stable identifier, used by the UI as a list key
    pub id: Uuid,
    /// The role of the author
    pub role: Role,
    /// The content of the turn
    pub text: String,
    /// When the turn was created
    pub timestamp: DateTime<Local>,
}

impl ConversationTurn {
    /// Create a turn stamped with the current local time
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self::at(role, text, Local::now())
    }

    /// Create a turn with an explicit timestamp
    pub fn at(role: Role, text: impl Into<String>, timestamp: DateTime<Local>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

impl fmt::Display for ConversationTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"), self.text)
    }
}
