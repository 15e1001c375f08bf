//! Drives chat turns: question → insurer data → prompt → streamed answer → chat log.
//!
//! Each turn runs as its own tokio task and reports progress through a bounded
//! channel of [`TurnEvent`]s. A session accepts one turn at a time; clearing the
//! history is refused while a turn is running. Dropping the event receiver (or
//! calling [`Turn::cancel`]) cancels the turn at its next suspension point and
//! nothing is appended to the log.

use std::{pin::pin, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    config::ChatConfig,
    error::{ChatError, Result},
    generation::{OllamaClient, TextGenerator},
    insurer::{InsurerClient, InsurerDataSource, InsurerPayload},
    prompt::InsurerContext,
    query::extract_query_params,
    session::{ChatMessage, SessionState},
    storage::{InMemorySessionStorage, SessionStorage},
    stream::{StreamUpdate, process_stream},
};

pub const LOADING_MESSAGE: &str = "Getting Insurer FAIR analysis information...";

const EVENT_BUFFER: usize = 64;

/// Progress of a running turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Status { message: String },
    Fragment(StreamUpdate),
    Completed { message: String },
    Failed { reason: String, message: String },
}

/// How a turn ended. `message` is what was appended to the chat log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed(String),
    Failed { reason: String, message: String },
    Cancelled,
}

/// Handle to a turn running in the background.
pub struct Turn {
    events: mpsc::Receiver<TurnEvent>,
    task: JoinHandle<TurnOutcome>,
}

impl Turn {
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    /// Aborts the turn wherever it is suspended.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Drains the remaining events and waits for the outcome.
    pub async fn wait(mut self) -> TurnOutcome {
        while self.events.recv().await.is_some() {}
        self.task.await.unwrap_or(TurnOutcome::Cancelled)
    }

    /// Detaches the task; it keeps running while the receiver is alive.
    pub fn into_events(self) -> mpsc::Receiver<TurnEvent> {
        self.events
    }
}

/// Marks a session busy until dropped.
struct TurnGuard {
    active_turns: Arc<DashMap<String, ()>>,
    session_id: String,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.active_turns.remove(&self.session_id);
    }
}

#[derive(Clone)]
pub struct ChatController {
    insurer: Arc<dyn InsurerDataSource>,
    generator: Arc<dyn TextGenerator>,
    storage: Arc<dyn SessionStorage>,
    active_turns: Arc<DashMap<String, ()>>,
    default_insurer_id: String,
}

impl ChatController {
    pub fn new(
        insurer: Arc<dyn InsurerDataSource>,
        generator: Arc<dyn TextGenerator>,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        Self {
            insurer,
            generator,
            storage,
            active_turns: Arc::new(DashMap::new()),
            default_insurer_id: crate::config::DEFAULT_INSURER_ID.to_string(),
        }
    }

    /// HTTP clients from `config`, sessions kept in memory.
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let insurer = Arc::new(InsurerClient::from_config(config)?);
        let generator = Arc::new(OllamaClient::from_config(config)?);
        let storage = Arc::new(InMemorySessionStorage::with_limits(
            config.max_sessions,
            config.session_idle_timeout,
        ));
        Ok(Self::new(insurer, generator, storage)
            .with_default_insurer_id(config.default_insurer_id.clone()))
    }

    pub fn with_default_insurer_id(mut self, insurer_id: impl Into<String>) -> Self {
        self.default_insurer_id = insurer_id.into();
        self
    }

    pub fn default_insurer_id(&self) -> &str {
        &self.default_insurer_id
    }

    pub async fn start_session(&self, insurer_id: Option<String>) -> Result<SessionState> {
        let insurer_id = insurer_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| self.default_insurer_id.clone());
        let session = SessionState::new(Uuid::new_v4().to_string(), insurer_id);

        info!(session_id = %session.id, insurer_id = %session.insurer_id, "Starting chat session");

        self.storage.save(session.clone()).await?;
        Ok(session)
    }

    pub async fn session(&self, session_id: &str) -> Result<SessionState> {
        self.storage
            .get(session_id)
            .await?
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.active_turns.contains_key(session_id)
    }

    pub async fn clear(&self, session_id: &str) -> Result<SessionState> {
        let _guard = self.acquire(session_id)?;
        let mut session = self.session(session_id).await?;
        session.reset();
        self.storage.save(session.clone()).await?;

        info!(session_id = %session_id, "Cleared chat history");
        Ok(session)
    }

    /// Starts a turn for `text`. Blank input is ignored and returns `Ok(None)`.
    pub async fn send(&self, session_id: &str, text: &str) -> Result<Option<Turn>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let guard = self.acquire(session_id)?;
        let mut session = self.session(session_id).await?;
        session.append(ChatMessage::user(text));
        session.pending_input.clear();
        self.storage.save(session.clone()).await?;

        let pipeline = TurnPipeline {
            insurer: self.insurer.clone(),
            generator: self.generator.clone(),
            storage: self.storage.clone(),
            session_id: session.id.clone(),
            insurer_id: session.insurer_id.clone(),
            question: text.to_string(),
        };
        let span = tracing::info_span!(
            "chat_turn",
            session_id = %session.id,
            insurer_id = %session.insurer_id
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let task = tokio::spawn(
            async move {
                let outcome = pipeline.run(tx).await;
                drop(guard);
                outcome
            }
            .instrument(span),
        );

        Ok(Some(Turn { events: rx, task }))
    }

    /// Runs a whole turn and returns how it ended; `None` for blank input.
    pub async fn run_to_completion(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<Option<TurnOutcome>> {
        match self.send(session_id, text).await? {
            Some(turn) => Ok(Some(turn.wait().await)),
            None => Ok(None),
        }
    }

    fn acquire(&self, session_id: &str) -> Result<TurnGuard> {
        match self.active_turns.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(ChatError::TurnInProgress(session_id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(());
                Ok(TurnGuard {
                    active_turns: self.active_turns.clone(),
                    session_id: session_id.to_string(),
                })
            }
        }
    }
}

struct TurnPipeline {
    insurer: Arc<dyn InsurerDataSource>,
    generator: Arc<dyn TextGenerator>,
    storage: Arc<dyn SessionStorage>,
    session_id: String,
    insurer_id: String,
    question: String,
}

struct Cancelled;

async fn emit(
    events: &mpsc::Sender<TurnEvent>,
    event: TurnEvent,
) -> std::result::Result<(), Cancelled> {
    events.send(event).await.map_err(|_| Cancelled)
}

impl TurnPipeline {
    async fn run(self, events: mpsc::Sender<TurnEvent>) -> TurnOutcome {
        tokio::select! {
            biased;
            outcome = self.execute(&events) => outcome,
            _ = events.closed() => {
                info!("Turn cancelled: event receiver dropped");
                TurnOutcome::Cancelled
            }
        }
    }

    async fn execute(&self, events: &mpsc::Sender<TurnEvent>) -> TurnOutcome {
        let status = TurnEvent::Status {
            message: LOADING_MESSAGE.to_string(),
        };
        if emit(events, status).await.is_err() {
            return TurnOutcome::Cancelled;
        }

        let params = extract_query_params(&self.question);
        info!(
            attack_type = ?params.attack_type,
            year = ?params.year,
            "Extracted query parameters"
        );

        let payload = InsurerPayload::new(self.insurer_id.clone(), &params, None);
        let fetched = self.insurer.fetch_insurer_data(&payload).await;
        if let Err(e) = &fetched {
            warn!(error = %e, "Insurer data unavailable, continuing without it");
        }
        let context = InsurerContext::from(fetched);

        let body = match self
            .generator
            .generate_grounded(&self.question, Some(&context), &params)
            .await
        {
            Ok(body) => body,
            Err(e) => return self.fail(events, String::new(), e).await,
        };

        let mut updates = pin!(process_stream(body));
        let mut cumulative = String::new();
        let mut fragments = 0usize;

        while let Some(update) = updates.next().await {
            match update {
                Ok(update) => {
                    cumulative = update.cumulative.clone();
                    fragments += 1;
                    if emit(events, TurnEvent::Fragment(update)).await.is_err() {
                        info!(fragments, "Turn cancelled mid-stream");
                        return TurnOutcome::Cancelled;
                    }
                }
                Err(e) => return self.fail(events, cumulative, e).await,
            }
        }

        self.record(ChatMessage::bot(cumulative.clone())).await;
        info!(fragments, response_length = cumulative.len(), "Turn completed");

        // The answer is already in the log; a vanished receiver changes nothing now.
        let _ = emit(
            events,
            TurnEvent::Completed {
                message: cumulative.clone(),
            },
        )
        .await;

        TurnOutcome::Completed(cumulative)
    }

    async fn fail(
        &self,
        events: &mpsc::Sender<TurnEvent>,
        partial: String,
        cause: ChatError,
    ) -> TurnOutcome {
        error!(error = %cause, partial_length = partial.len(), "Turn failed");

        let reason = cause.to_string();
        let notice = format!("[The response could not be completed: {}]", reason);
        let message = if partial.is_empty() {
            notice
        } else {
            format!("{}\n\n{}", partial, notice)
        };

        self.record(ChatMessage::bot(message.clone())).await;
        let _ = emit(
            events,
            TurnEvent::Failed {
                reason: reason.clone(),
                message: message.clone(),
            },
        )
        .await;

        TurnOutcome::Failed { reason, message }
    }

    async fn record(&self, message: ChatMessage) {
        match self.storage.get(&self.session_id).await {
            Ok(Some(mut session)) => {
                session.append(message);
                if let Err(e) = self.storage.save(session).await {
                    error!(error = %e, "Failed to save session");
                }
            }
            Ok(None) => warn!("Session disappeared before the answer could be recorded"),
            Err(e) => error!(error = %e, "Failed to load session"),
        }
    }
}
