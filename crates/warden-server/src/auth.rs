//! Session resolution middleware.
//!
//! Extracts a session identifier from the request and resolves it through
//! the [`SessionManager`]. Lookup order:
//!
//! 1. the query parameter (default `sid`)
//! 2. `Authorization: <SCHEME> <base64 id>` (default scheme `DSSESSION`,
//!    matched case-insensitively)
//!
//! A malformed header is the same as no header. Protected handlers receive
//! the resolved record through `Extension<SessionRecord>`.

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode, Uri, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::{debug, trace};
use warden_session::{DEFAULT_AUTH_SCHEME, DEFAULT_QUERY_PARAM, SessionManager, SessionRecord};

// ─────────────────────────────────────────────────────────────────────────────
// Auth Error
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication error.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// No session id in the query string or authorization header.
    MissingSession,
    /// The id does not name a live session.
    UnknownSession,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingSession => write!(f, "Missing session"),
            AuthError::UnknownSession => write!(f, "Invalid or expired session"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = StatusCode::UNAUTHORIZED;
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────────────────

/// Turns inbound requests into live session records.
#[derive(Debug, Clone)]
pub struct AuthResolver {
    manager: SessionManager,
    scheme: String,
    query_param: String,
}

impl AuthResolver {
    /// Create a resolver with the default scheme and query parameter.
    pub fn new(manager: SessionManager) -> Self {
        Self {
            manager,
            scheme: DEFAULT_AUTH_SCHEME.to_string(),
            query_param: DEFAULT_QUERY_PARAM.to_string(),
        }
    }

    /// Set the authorization scheme token.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Set the query parameter name.
    pub fn with_query_param(mut self, param: impl Into<String>) -> Self {
        self.query_param = param.into();
        self
    }

    /// The manager sessions are resolved against.
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// The configured scheme token.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Header value a client must send to present `session_id`.
    pub fn authorization_value(&self, session_id: &str) -> String {
        format!("{} {}", self.scheme, STANDARD.encode(session_id))
    }

    /// Extract a session id, query parameter first, then header.
    pub fn extract_session_id(&self, uri: &Uri, headers: &HeaderMap) -> Option<String> {
        if let Some(id) = self.from_query(uri) {
            return Some(id);
        }

        let value = headers.get(AUTHORIZATION)?;
        let Ok(value) = value.to_str() else {
            debug!("Authorization header is not valid ASCII");
            return None;
        };
        self.parse_authorization(value)
    }

    /// Extract and resolve the session, refreshing it on success.
    pub async fn resolve(&self, uri: &Uri, headers: &HeaderMap) -> Option<SessionRecord> {
        let session_id = self.extract_session_id(uri, headers)?;
        self.manager.get_session(&session_id).await
    }

    fn from_query(&self, uri: &Uri) -> Option<String> {
        let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
        params
            .get(&self.query_param)
            .filter(|id| !id.is_empty())
            .cloned()
    }

    fn parse_authorization(&self, value: &str) -> Option<String> {
        let Some((scheme, encoded)) = value.trim().split_once(' ') else {
            debug!("Authorization header has no scheme");
            return None;
        };
        if !scheme.eq_ignore_ascii_case(&self.scheme) {
            trace!(scheme = %scheme, "Authorization scheme not ours");
            return None;
        }

        let bytes = match STANDARD.decode(encoded.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "Authorization value is not valid base64");
                return None;
            }
        };

        String::from_utf8(bytes).ok().filter(|id| !id.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Require a live session.
///
/// Responds `401` when no id can be extracted or the id names no live
/// session. Otherwise inserts the [`SessionRecord`] into request extensions.
pub async fn require_session(
    State(resolver): State<AuthResolver>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let session_id = resolver
        .extract_session_id(request.uri(), request.headers())
        .ok_or(AuthError::MissingSession)?;

    let session = resolver
        .manager()
        .get_session(&session_id)
        .await
        .ok_or(AuthError::UnknownSession)?;

    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
