//! Login, logout and session payload endpoints.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_session::{Payload, SessionRecord};

use crate::error::{Result, ServerError};
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response types
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// User the session is bound to.
    pub user_id: String,
    /// Initial payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
}

/// Response of `POST /login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// The new session id.
    pub session_id: String,
    /// Ready-to-send `Authorization` header value.
    pub authorization: String,
}

/// Public view of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub data: Payload,
}

impl From<&SessionRecord> for SessionView {
    fn from(record: &SessionRecord) -> Self {
        Self {
            session_id: record.id().to_string(),
            user_id: record.user_id().to_string(),
            created_at: record.created_at(),
            last_accessed: record.last_accessed(),
            data: record.payload(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /login - start a session for a user.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let user_id = request.user_id.trim();
    if user_id.is_empty() {
        return Err(ServerError::BadRequest("user_id must not be empty".to_string()));
    }

    let record = state.sessions().start_session(user_id, request.data).await;
    debug!(session_id = %record.id(), user_id, "Login");

    Ok(Json(LoginResponse {
        authorization: state.resolver.authorization_value(record.id()),
        session_id: record.id().to_string(),
    }))
}

/// GET /session - describe the caller's session.
pub async fn get_session_handler(Extension(record): Extension<SessionRecord>) -> Json<SessionView> {
    Json(SessionView::from(&record))
}

/// PUT /session/data/{key} - set one payload entry.
pub async fn put_data_handler(
    Extension(record): Extension<SessionRecord>,
    Path(key): Path<String>,
    Json(value): Json<serde_json::Value>,
) -> StatusCode {
    record.put_data(key, value);
    StatusCode::NO_CONTENT
}

/// DELETE /session/data/{key} - remove one payload entry.
pub async fn delete_data_handler(
    Extension(record): Extension<SessionRecord>,
    Path(key): Path<String>,
) -> Result<StatusCode> {
    if !record.has_data(&key) {
        return Err(ServerError::NotFound(format!("No session data under '{key}'")));
    }
    record.remove_data(&key);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /logout - close the caller's session.
pub async fn logout_handler(Extension(record): Extension<SessionRecord>) -> StatusCode {
    record.close().await;
    StatusCode::NO_CONTENT
}
