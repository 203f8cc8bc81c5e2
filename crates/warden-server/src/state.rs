//! Application state shared across handlers.

use axum::extract::FromRef;
use warden_session::SessionManager;

use crate::auth::AuthResolver;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Session resolver, which also owns the manager handle.
    pub resolver: AuthResolver,
}

impl AppState {
    /// Create state around a resolver.
    pub fn new(resolver: AuthResolver) -> Self {
        Self { resolver }
    }

    /// The session manager.
    pub fn sessions(&self) -> &SessionManager {
        self.resolver.manager()
    }
}

impl FromRef<AppState> for AuthResolver {
    fn from_ref(state: &AppState) -> Self {
        state.resolver.clone()
    }
}
