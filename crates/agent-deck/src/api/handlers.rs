//! HTTP request handlers.

use agent_deck_protocol::MessagesResponse;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::conversation::{ConversationError, conversation_dir, load_conversation};
use crate::session::{NewSession, Session, SessionStatus};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Connected `/ws/events` clients.
    pub clients: usize,
    /// Handlers registered on the event bus.
    pub subscribers: usize,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        clients: state.hub.client_count(),
        subscribers: state.bus.subscriber_count(),
    })
}

/// Resolve the active branch of a session's conversation.
///
/// GET /api/messages/{session_id}
pub async fn get_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<MessagesResponse>> {
    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| ApiError::not_found(format!("session {session_id} not found")))?;

    let dir = conversation_dir(&state.settings.projects_dir, &session.project_path);
    debug!(session_id = %session.id, dir = %dir.display(), "resolving conversation");

    let conversation = tokio::task::spawn_blocking(move || load_conversation(&dir))
        .await
        .map_err(|err| ConversationError::BuildFailed(err.to_string()))??;

    state.sessions.record_conversation(
        &session.id,
        conversation.file.as_deref(),
        conversation.dag_info.total_nodes,
    )?;

    Ok(Json(MessagesResponse {
        session_id: session.id,
        messages: conversation.messages,
        dag_info: conversation.dag_info,
    }))
}

/// GET /api/messages without a session id.
pub async fn missing_session_id() -> ApiError {
    ApiError::bad_request("session id is required")
}

/// GET /api/sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<Session>> {
    Json(state.sessions.list())
}

/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<NewSession>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let Json(request) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let session = state.sessions.create(request)?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// DELETE /api/sessions/{session_id}
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.sessions.remove(&session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// POST /api/sessions/{session_id}/status
pub async fn set_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> ApiResult<Json<Session>> {
    let Json(request) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let status: SessionStatus = request.status.parse()?;
    Ok(Json(state.sessions.set_status(&session_id, status)?))
}

/// Router fallback for unknown paths.
pub async fn not_found() -> ApiError {
    ApiError::not_found("no such endpoint")
}

/// Router fallback for known paths with the wrong method.
pub async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed("method not allowed")
}
