use crate::models::ChatMessage;
use chrono::{DateTime, Utc};

/// The conversation shown to the user. The id is issued by the backend and
/// stays empty until then.
#[derive(Debug, Clone)]
pub struct ChatSession {
    id: String,
    messages: Vec<ChatMessage>,
    created_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            messages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: String) {
        self.id = id;
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn push(&mut self, message: ChatMessage) -> &ChatMessage {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Starts over with no id and no messages.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}
