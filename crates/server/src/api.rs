//! JSON API for the chat frontend.
//!
//! Endpoints:
//! - `POST   /api/chat/{session_id}/message`  — run one turn; `"stream": true`
//!   in the body switches the response to an SSE chunk stream
//! - `GET    /api/chat/{session_id}/messages` — full transcript
//! - `DELETE /api/chat/{session_id}/messages` — clear the transcript
//! - `POST   /api/chat/{session_id}/model`    — switch the session's model
//! - `GET    /api/sessions`                   — list sessions, recent first
//! - `POST   /api/sessions`                   — create a session up front
//! - `GET    /api/sessions/{session_id}`      — fetch one session
//! - `PUT    /api/sessions/{session_id}/title`— rename a session
//! - `DELETE /api/sessions/{session_id}`      — delete a session and transcript
//! - `DELETE /api/sessions`                   — delete everything

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use scout_core::domain::session::{ChatMessage, Session, SessionEvent, ToolInvocation};

use crate::chat::{ChatService, TurnReply};
use crate::sessions::{ServiceError, SessionService};

// Persist partial output once per this many stream chunks, so a crashed
// turn leaves a recent buffer behind without a write per token.
const STREAM_PERSIST_EVERY: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub sessions: Arc<SessionService>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

type Rejection = (StatusCode, Json<ApiError>);

fn reject(status: StatusCode, message: impl Into<String>) -> Rejection {
    (status, Json(ApiError { error: message.into() }))
}

fn service_rejection(err: ServiceError) -> Rejection {
    match err {
        ServiceError::SessionNotFound(id) => {
            reject(StatusCode::NOT_FOUND, format!("session {id} not found"))
        }
        ServiceError::Repository(err) => {
            tracing::error!(error = %err, "storage failure in api handler");
            reject(StatusCode::INTERNAL_SERVER_ERROR, "storage failure")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetModelRequest {
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub title: Option<String>,
    pub first_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub session_id: Uuid,
    pub message_id: Uuid,
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub preview: bool,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

impl From<TurnReply> for MessageResponse {
    fn from(reply: TurnReply) -> Self {
        Self {
            session_id: reply.message.session_id,
            message_id: reply.message.id,
            content: reply.message.content.clone(),
            tool_calls: reply.tool_calls,
            preview: reply.preview,
            model: reply.session.model,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat/{session_id}/message", post(send_message))
        .route("/api/chat/{session_id}/messages", get(list_messages).delete(clear_messages))
        .route("/api/chat/{session_id}/model", post(set_model))
        .route(
            "/api/sessions",
            get(list_sessions).post(create_session).delete(delete_all_sessions),
        )
        .route("/api/sessions/{session_id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{session_id}/title", put(rename_session))
        .with_state(state)
}

pub async fn send_message(
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Response, Rejection> {
    let text = request.message.trim().to_string();
    if text.is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    if request.stream {
        return Ok(stream_turn(state, session_id, text, request.model).into_response());
    }

    let reply = state
        .chat
        .send_message(session_id, &text, request.model, None)
        .await
        .map_err(service_rejection)?;
    Ok(Json(MessageResponse::from(reply)).into_response())
}

/// The same turn as the JSON path, delivered as `chunk` SSE events followed
/// by one `done` event carrying the full reply.
fn stream_turn(
    state: AppState,
    session_id: Uuid,
    text: String,
    model: Option<String>,
) -> impl IntoResponse {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<Event, Infallible>>();

    tokio::spawn(async move {
        let buffer = Arc::new(StdMutex::new(String::new()));
        let counter = AtomicUsize::new(0);
        let chunk_tx = tx.clone();
        let sessions = state.sessions.clone();

        let sink = {
            let buffer = buffer.clone();
            move |chunk: &str| {
                let _ = chunk_tx.send(Ok(Event::default().event("chunk").data(chunk)));

                let snapshot = {
                    let mut accumulated = match buffer.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    accumulated.push_str(chunk);
                    accumulated.clone()
                };
                if counter.fetch_add(1, Ordering::Relaxed) % STREAM_PERSIST_EVERY == 0 {
                    let sessions = sessions.clone();
                    // The write is guarded on the session's in-flight flag, so
                    // a persist that lands after the turn finished is a no-op.
                    tokio::spawn(async move {
                        if let Err(err) =
                            sessions.stream_progress(session_id, &snapshot).await
                        {
                            tracing::warn!(error = %err, "stream buffer persist failed");
                        }
                    });
                }
            }
        };

        let result = state.chat.send_message(session_id, &text, model, Some(&sink)).await;

        let event = match result {
            Ok(reply) => Event::default()
                .event("done")
                .json_data(MessageResponse::from(reply))
                .unwrap_or_else(|err| {
                    tracing::error!(error = %err, "could not encode done event");
                    Event::default().event("error").data("encoding failure")
                }),
            Err(err) => {
                tracing::error!(error = %err, "streamed turn failed");
                Event::default().event("error").data(err.to_string())
            }
        };
        let _ = tx.send(Ok(event));
    });

    Sse::new(UnboundedReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

pub async fn list_messages(
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ChatMessage>>, Rejection> {
    if state.sessions.find(session_id).await.map_err(service_rejection)?.is_none() {
        return Err(reject(StatusCode::NOT_FOUND, format!("session {session_id} not found")));
    }
    let transcript = state.sessions.transcript(session_id).await.map_err(service_rejection)?;
    Ok(Json(transcript))
}

pub async fn clear_messages(
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<DeletedResponse>, Rejection> {
    let deleted =
        state.sessions.clear_transcript(session_id).await.map_err(service_rejection)?;
    Ok(Json(DeletedResponse { deleted }))
}

pub async fn set_model(
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<SetModelRequest>,
) -> Result<Json<Session>, Rejection> {
    let model = request.model.trim();
    if model.is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "model must not be empty"));
    }
    let session = state
        .sessions
        .apply(session_id, SessionEvent::ModelChanged { model: model.to_string() })
        .await
        .map_err(service_rejection)?;
    Ok(Json(session))
}

pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<Session>>, Rejection> {
    let sessions = state.sessions.list().await.map_err(service_rejection)?;
    Ok(Json(sessions))
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), Rejection> {
    let session = state
        .sessions
        .open(request.title, request.first_message.as_deref())
        .await
        .map_err(service_rejection)?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Session>, Rejection> {
    state
        .sessions
        .find(session_id)
        .await
        .map_err(service_rejection)?
        .map(Json)
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, format!("session {session_id} not found")))
}

pub async fn rename_session(
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<Session>, Rejection> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "title must not be empty"));
    }
    let session = state
        .sessions
        .rename(session_id, title.to_string())
        .await
        .map_err(service_rejection)?;
    Ok(Json(session))
}

pub async fn delete_session(
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<DeletedResponse>, Rejection> {
    let deleted = state.sessions.delete(session_id).await.map_err(service_rejection)?;
    if !deleted {
        return Err(reject(StatusCode::NOT_FOUND, format!("session {session_id} not found")));
    }
    Ok(Json(DeletedResponse { deleted: 1 }))
}

pub async fn delete_all_sessions(
    State(state): State<AppState>,
) -> Result<Json<DeletedResponse>, Rejection> {
    let deleted = state.sessions.delete_all().await.map_err(service_rejection)?;
    Ok(Json(DeletedResponse { deleted }))
}
