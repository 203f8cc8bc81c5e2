//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use warden_server::{AppState, AuthResolver, Server};
use warden_session::{ManagerConfig, SessionManager};

/// A test server that runs in the background.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// HTTP client configured for this server.
    pub client: Client,
    /// Handle to the manager the server resolves against.
    pub sessions: SessionManager,
    /// Resolver used by the server, for building header values.
    pub resolver: AuthResolver,
    /// Handle to the server task.
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a new test server with default configuration.
    pub async fn start() -> Result<Self> {
        Self::start_with_manager(SessionManager::new(ManagerConfig::new())).await
    }

    /// Start a test server around an existing manager.
    pub async fn start_with_manager(sessions: SessionManager) -> Result<Self> {
        let addr = find_available_port().await?;
        let resolver = AuthResolver::new(sessions.clone());

        let server = Server::from_state(AppState::new(resolver.clone()));
        let handle = tokio::spawn(async move {
            let _ = server.run_on(addr).await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            sessions,
            resolver,
            _handle: handle,
        })
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Log in and return the session id.
    pub async fn login(&self, user_id: &str) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/login", self.base_url()))
            .json(&serde_json::json!({ "user_id": user_id }))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        body["session_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("login response has no session_id"))
    }

    /// Request builder presenting `session_id` in the authorization header.
    pub fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        session_id: &str,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url(), path))
            .header("Authorization", self.resolver.authorization_value(session_id))
    }
}

/// Find an available port for the test server.
pub async fn find_available_port() -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}
