use std::convert::Infallible;

use axum::{
    Form, Router,
    extract::{Path, Query, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::{
        Html, IntoResponse, Json, Redirect, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use fair_chat::{ChatController, ChatError, TurnEvent, TurnOutcome};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    config::ServiceConfig,
    models::{
        ChatForm, CreateSessionRequest, FormAction, PageQuery, SendMessageRequest,
        SessionResponse,
    },
    page::render_page,
};

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn chat_error(session_id: &str, e: ChatError) -> ApiError {
    match e {
        ChatError::SessionNotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Session not found",
                "session_id": session_id
            })),
        ),
        ChatError::TurnInProgress(_) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "A reply is still being generated for this session",
                "session_id": session_id
            })),
        ),
        other => {
            error!(session_id = %session_id, error = %other, "Chat request failed");
            internal_error("Chat request failed", &other.to_string())
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub controller: ChatController,
}

pub fn create_app(config: &ServiceConfig) -> anyhow::Result<Router> {
    let controller = ChatController::from_config(&config.chat)?;
    info!(
        insurer_api_url = %config.chat.insurer_api_url,
        generation_api_url = %config.chat.generation_api_url,
        model = %config.chat.model,
        "Chat controller ready"
    );
    Ok(build_router(AppState { controller }))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(chat_page))
        .route("/health", get(health_check))
        .route("/chat/{session_id}", post(submit_form))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{session_id}", get(get_session))
        .route("/api/sessions/{session_id}/clear", post(clear_session))
        .route("/api/sessions/{session_id}/messages", post(send_message))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(correlation_id_middleware))
        .with_state(app_state)
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);

    next.run(request).instrument(span).await
}

async fn health_check() -> &'static str {
    "OK"
}

fn page_url(insurer_id: &str, session_id: &str) -> String {
    format!(
        "/?insurerId={}&session={}",
        urlencoding::encode(insurer_id),
        urlencoding::encode(session_id)
    )
}

async fn chat_page(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Response, ApiError> {
    if let Some(session_id) = &query.session {
        match state.controller.session(session_id).await {
            Ok(session) => return Ok(Html(render_page(&session)).into_response()),
            Err(ChatError::SessionNotFound(_)) => {
                info!(session_id = %session_id, "Unknown session, starting a new one");
            }
            Err(e) => return Err(chat_error(session_id, e)),
        }
    }

    let session = state
        .controller
        .start_session(query.insurer_id)
        .await
        .map_err(|e| chat_error("new", e))?;

    Ok(Redirect::to(&page_url(&session.insurer_id, &session.id)).into_response())
}

async fn submit_form(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Form(form): Form<ChatForm>,
) -> Result<Redirect, ApiError> {
    let controller = &state.controller;
    let session = match controller.session(&session_id).await {
        Ok(session) => session,
        Err(ChatError::SessionNotFound(_)) => {
            warn!(session_id = %session_id, "Form posted for an unknown session");
            return Ok(Redirect::to("/"));
        }
        Err(e) => return Err(chat_error(&session_id, e)),
    };
    let back = Redirect::to(&page_url(&session.insurer_id, &session.id));

    let result = match form.action {
        FormAction::Clear => controller.clear(&session_id).await.map(|_| ()),
        FormAction::Send => controller
            .run_to_completion(&session_id, &form.text)
            .await
            .map(|outcome| {
                if let Some(outcome) = outcome {
                    info!(
                        session_id = %session_id,
                        outcome = outcome_label(&outcome),
                        "Form turn finished"
                    );
                }
            }),
    };

    match result {
        Ok(()) => Ok(back),
        Err(ChatError::TurnInProgress(_)) => {
            warn!(session_id = %session_id, "Form ignored while a turn is running");
            Ok(back)
        }
        Err(e) => Err(chat_error(&session_id, e)),
    }
}

fn outcome_label(outcome: &TurnOutcome) -> &'static str {
    match outcome {
        TurnOutcome::Completed(_) => "completed",
        TurnOutcome::Failed { .. } => "failed",
        TurnOutcome::Cancelled => "cancelled",
    }
}

async fn create_session(
    State(state): State<AppState>,
    request: Option<Json<CreateSessionRequest>>,
) -> ApiResult<SessionResponse> {
    let insurer_id = request.and_then(|Json(request)| request.insurer_id);
    let session = state
        .controller
        .start_session(insurer_id)
        .await
        .map_err(|e| chat_error("new", e))?;

    Ok(Json(SessionResponse::new(session, false)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    let session = state
        .controller
        .session(&session_id)
        .await
        .map_err(|e| chat_error(&session_id, e))?;
    let busy = state.controller.is_busy(&session_id);

    Ok(Json(SessionResponse::new(session, busy)))
}

async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    let session = state
        .controller
        .clear(&session_id)
        .await
        .map_err(|e| chat_error(&session_id, e))?;

    Ok(Json(SessionResponse::new(session, false)))
}

fn sse_event(event: TurnEvent) -> Event {
    let (name, data) = match event {
        TurnEvent::Status { message } => ("status", json!({ "message": message })),
        TurnEvent::Fragment(update) => (
            "fragment",
            json!({ "fragment": update.fragment, "cumulative": update.cumulative }),
        ),
        TurnEvent::Completed { message } => ("done", json!({ "message": message })),
        TurnEvent::Failed { reason, message } => {
            ("error", json!({ "reason": reason, "message": message }))
        }
    };
    Event::default().event(name).data(data.to_string())
}

async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    info!(
        session_id = %session_id,
        content_length = request.text.len(),
        "Processing chat message"
    );

    let turn = state
        .controller
        .send(&session_id, &request.text)
        .await
        .map_err(|e| chat_error(&session_id, e))?;

    let Some(turn) = turn else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let events = ReceiverStream::new(turn.into_events())
        .map(|event| Ok::<_, Infallible>(sse_event(event)));

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}
