use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Insurer data request failed: {0}")]
    InsurerRequest(String),

    #[error("Insurer API returned {status}: {body}")]
    InsurerStatus { status: u16, body: String },

    #[error("Insurer API returned malformed JSON: {0}")]
    InsurerDecode(String),

    #[error("Could not connect to the generation service: {0}")]
    GenerationConnect(String),

    #[error("Generation service returned {status}: {body}")]
    GenerationStatus { status: u16, body: String },

    #[error("Generation service reported an error: {0}")]
    GenerationFailed(String),

    #[error("Malformed stream chunk {line:?}: {reason}")]
    MalformedChunk { line: String, reason: String },

    #[error("Failed to read generation stream: {0}")]
    StreamRead(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("A turn is already in progress for session {0}")]
    TurnInProgress(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;
