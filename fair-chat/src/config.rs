use std::time::Duration;

pub const DEFAULT_INSURER_API_URL: &str = "https://localhost:44346/api/GetInsurerFAIRDetails/";
pub const DEFAULT_GENERATION_API_URL: &str = "http://localhost:11434/api/generate";
pub const DEFAULT_MODEL: &str = "llama3.2:latest";
pub const DEFAULT_INSURER_ID: &str = "11";
pub const DEFAULT_MAX_SESSIONS: usize = 1000;
pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Endpoints and model used by a chat turn.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub insurer_api_url: String,
    /// Skip TLS certificate validation against the insurer API (local development certs).
    pub accept_invalid_certs: bool,
    pub generation_api_url: String,
    pub model: String,
    /// `None` leaves generation requests unbounded.
    pub generation_timeout: Option<Duration>,
    pub default_insurer_id: String,
    /// Sessions held in memory before the least recently used is evicted.
    pub max_sessions: usize,
    pub session_idle_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            insurer_api_url: DEFAULT_INSURER_API_URL.to_string(),
            accept_invalid_certs: true,
            generation_api_url: DEFAULT_GENERATION_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            generation_timeout: None,
            default_insurer_id: DEFAULT_INSURER_ID.to_string(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_idle_timeout: DEFAULT_SESSION_IDLE_TIMEOUT,
        }
    }
}
