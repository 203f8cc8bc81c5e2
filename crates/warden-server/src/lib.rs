//! HTTP surface for Warden sessions.
//!
//! This crate wires a [`SessionManager`] into axum:
//!
//! - [`AuthResolver`] extracts a session id from a request and resolves it
//! - [`require_session`] middleware rejects requests without a live session
//! - a small demo API for login, payload edits and logout
//!
//! # Example
//!
//! ```ignore
//! use warden_server::{AuthResolver, Server};
//! use warden_session::{ManagerConfig, SessionManager};
//!
//! let manager = SessionManager::new(ManagerConfig::default());
//! let server = Server::new(AuthResolver::new(manager));
//! server.run_on("127.0.0.1:8080".parse()?).await?;
//! ```

pub mod auth;
pub mod error;
pub mod hooks;
pub mod routes;
pub mod state;

pub use auth::{AuthError, AuthResolver, require_session};
pub use error::{Result, ServerError};
pub use hooks::TracingHooks;
pub use routes::{LoginRequest, LoginResponse, SessionView};
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use axum::{Router, middleware};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use warden_session::SessionManager;

/// The Warden HTTP server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a server around a resolver.
    pub fn new(resolver: AuthResolver) -> Self {
        Self {
            state: AppState::new(resolver),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// The session manager behind this server.
    pub fn sessions(&self) -> &SessionManager {
        self.state.sessions()
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::post;

        Router::new()
            .merge(routes::health_routes())
            .route("/login", post(routes::login_handler))
            .merge(self.session_routes())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Routes that need a live session.
    fn session_routes(&self) -> Router<AppState> {
        use axum::routing::{get, post, put};

        Router::new()
            .route("/session", get(routes::get_session_handler))
            .route(
                "/session/data/{key}",
                put(routes::put_data_handler).delete(routes::delete_data_handler),
            )
            .route("/logout", post(routes::logout_handler))
            .layer(middleware::from_fn_with_state(
                self.state.resolver.clone(),
                auth::require_session,
            ))
    }

    /// Run the server on `addr` until the process is stopped.
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        self.run_until(addr, std::future::pending()).await
    }

    /// Run the server on `addr` until `shutdown` resolves.
    ///
    /// In-flight requests are allowed to finish.
    pub async fn run_until<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind: {}", e)))?;

        let local = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(format!("Failed to read address: {}", e)))?;
        info!("Starting server on {}", local);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)))?;

        info!("Server stopped");
        Ok(())
    }
}
