use serde::{Deserialize, Serialize};

/// How many messages are kept as request context. Oldest entries are
/// dropped first once the window is full.
pub const HISTORY_WINDOW: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Short tag shown next to each message and used in exported transcripts.
    pub fn tag(self) -> &'static str {
        match self {
            Role::User => "USR",
            Role::Assistant => "AI",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

pub struct ConversationState {
    messages: Vec<Message>,
    pub strict: bool,
    pub last_user_question: String,
    pub last_assistant_answer: String,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            strict: false,
            last_user_question: String::new(),
            last_assistant_answer: String::new(),
        }
    }

    pub fn push(&mut self, role: Role, content: &str) {
        self.messages.push(Message::new(role, content));
        if self.messages.len() > HISTORY_WINDOW {
            self.messages.remove(0);
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}
