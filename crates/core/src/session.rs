//! Per-connection session state for one student.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound on the short-term message history kept in a session.
pub const RECENT_MESSAGE_LIMIT: usize = 20;

/// One entry in the short-term conversation history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// The per-connection context of the student currently on the line.
///
/// Created when a connection is accepted, owned exclusively by that
/// connection's relay session, and discarded at disconnect. Never shared
/// across connections.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionState {
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    /// Lesson, topic or module the student is currently on, if any.
    pub current_lesson: Option<String>,
    /// Consolidated summary of the conversation so far, if any.
    pub conversation_summary: Option<String>,
    /// Student profile (cognitive style, preferences, diagnostics, ...).
    pub profile: Map<String, Value>,
    /// Free-form bag for agent-private context.
    pub extra: Map<String, Value>,
    // Private so the RECENT_MESSAGE_LIMIT bound cannot be bypassed.
    recent_messages: Vec<ChatMessage>,
}

impl SessionState {
    pub fn new(student_id: String, student_name: String, student_email: String) -> Self {
        Self {
            student_id,
            student_name,
            student_email,
            current_lesson: None,
            conversation_summary: None,
            profile: Map::new(),
            extra: Map::new(),
            recent_messages: Vec::new(),
        }
    }

    /// Appends a message to the short-term history, evicting the oldest
    /// entry once `RECENT_MESSAGE_LIMIT` is reached. Appending is the
    /// only way the history is ever mutated.
    pub fn add_message(&mut self, role: &str, content: &str) {
        self.recent_messages.push(ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        });
        if self.recent_messages.len() > RECENT_MESSAGE_LIMIT {
            self.recent_messages.remove(0);
        }
    }

    pub fn recent_messages(&self) -> &[ChatMessage] {
        &self.recent_messages
    }
}
