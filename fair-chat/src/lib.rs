pub mod config;
pub mod controller;
pub mod error;
pub mod generation;
pub mod insurer;
pub mod prompt;
pub mod query;
pub mod session;
pub mod storage;
pub mod stream;

// Re-export commonly used types
pub use config::ChatConfig;
pub use controller::{ChatController, LOADING_MESSAGE, Turn, TurnEvent, TurnOutcome};
pub use error::{ChatError, Result};
pub use generation::{ByteStream, GenerateRequest, OllamaClient, TextGenerator};
pub use insurer::{InsurerClient, InsurerDataSource, InsurerPayload};
pub use prompt::{InsurerContext, build_prompt, format_prompt};
pub use query::{QueryParams, extract_query_params};
pub use session::{CLEARED_MESSAGE, ChatMessage, Role, SessionState, WELCOME_MESSAGE};
pub use storage::{InMemorySessionStorage, SessionStorage};
pub use stream::{GenerationChunk, StreamUpdate, process_stream};
