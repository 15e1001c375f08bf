use fair_chat::{ChatMessage, SessionState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(rename = "insurerId")]
    pub insurer_id: Option<String>,
    pub session: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormAction {
    Send,
    Clear,
}

#[derive(Debug, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    pub text: String,
    pub action: FormAction,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(rename = "insurerId")]
    pub insurer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub insurer_id: String,
    pub messages: Vec<ChatMessage>,
    pub pending_input: String,
    pub busy: bool,
}

impl SessionResponse {
    pub fn new(session: SessionState, busy: bool) -> Self {
        Self {
            messages: session.messages().to_vec(),
            session_id: session.id,
            insurer_id: session.insurer_id,
            pending_input: session.pending_input,
            busy,
        }
    }
}
