use serde::{Deserialize, Serialize};

/// Greeting shown when a session is first opened.
pub const WELCOME_MESSAGE: &str = "Hello! I can help you analyze FAIR details.";
/// Greeting left behind by "Clear History".
pub const CLEARED_MESSAGE: &str = "Hello! How can I help you today?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            role: Role::Bot,
            text: text.into(),
        }
    }
}

/// Chat log of one UI session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    pub insurer_id: String,
    messages: Vec<ChatMessage>,
    pub pending_input: String,
}

impl SessionState {
    pub fn new(id: impl Into<String>, insurer_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            insurer_id: insurer_id.into(),
            messages: vec![ChatMessage::bot(WELCOME_MESSAGE)],
            pending_input: String::new(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Drops the whole history, leaving only the cleared greeting.
    pub fn reset(&mut self) {
        self.messages = vec![ChatMessage::bot(CLEARED_MESSAGE)];
        self.pending_input.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_with_greeting() {
        let session = SessionState::new("s1", "11");
        assert_eq!(session.messages(), &[ChatMessage::bot(WELCOME_MESSAGE)]);
        assert!(session.pending_input.is_empty());
    }

    #[test]
    fn test_reset_leaves_single_bot_message() {
        for turns in [0, 1, 7] {
            let mut session = SessionState::new("s1", "11");
            for i in 0..turns {
                session.append(ChatMessage::user(format!("question {i}")));
                session.append(ChatMessage::bot(format!("answer {i}")));
            }
            session.pending_input = "draft".to_string();

            session.reset();

            assert_eq!(session.messages(), &[ChatMessage::bot(CLEARED_MESSAGE)]);
            assert!(session.pending_input.is_empty());
        }
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","text":"hi"}"#);
    }
}
