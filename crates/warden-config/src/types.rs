//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_session::{ManagerConfig, PayloadCodec};

use crate::error::{ConfigError, Result};

pub use warden_session::{DEFAULT_AUTH_SCHEME, DEFAULT_QUERY_PARAM};

/// Root configuration, as read from `warden.toml`.
///
/// Every table is optional; absent tables fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Session manager configuration.
    pub session: Option<SessionConfig>,

    /// Identity-provider fallback configuration.
    pub identity: Option<IdentityConfig>,

    /// Authorization header / query parameter conventions.
    pub auth: Option<AuthConfig>,

    /// HTTP server configuration.
    pub server: Option<ServerConfig>,

    /// Logging configuration.
    pub logging: Option<LoggingConfig>,
}

impl WardenConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: WardenConfig) {
        if other.session.is_some() {
            self.session = other.session;
        }
        if other.identity.is_some() {
            self.identity = other.identity;
        }
        if other.auth.is_some() {
            self.auth = other.auth;
        }
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Session settings, or defaults.
    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    /// Auth settings, or defaults.
    pub fn auth(&self) -> AuthConfig {
        self.auth.clone().unwrap_or_default()
    }

    /// Server settings, or defaults.
    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    /// Logging settings, or defaults.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Reject values that would leave the service unusable.
    pub fn validate(&self) -> Result<()> {
        let session = self.session();
        if session.max_lifetime_secs == 0 {
            return Err(invalid("session.max_lifetime_secs", "must be greater than zero"));
        }
        if session.sweep_interval_secs == Some(0) {
            return Err(invalid("session.sweep_interval_secs", "must be greater than zero"));
        }

        let auth = self.auth();
        if auth.scheme.trim().is_empty() {
            return Err(invalid("auth.scheme", "must not be empty"));
        }
        if auth.scheme.contains(char::is_whitespace) {
            return Err(invalid("auth.scheme", "must be a single token"));
        }
        if auth.query_param.trim().is_empty() {
            return Err(invalid("auth.query_param", "must not be empty"));
        }

        if let Some(identity) = &self.identity {
            if identity.endpoint.trim().is_empty() {
                return Err(invalid("identity.endpoint", "must not be empty"));
            }
            if identity.timeout_secs == 0 {
                return Err(invalid("identity.timeout_secs", "must be greater than zero"));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session manager configuration.
///
/// ```toml
/// [session]
/// max_lifetime_secs = 3600
/// single_login = true
/// sweep_interval_secs = 60
/// codec = "json"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle lifetime in seconds before a session expires.
    pub max_lifetime_secs: u64,
    /// Whether a user may hold only one live session.
    pub single_login: bool,
    /// Seconds between sweeps; derived from the lifetime when absent.
    pub sweep_interval_secs: Option<u64>,
    /// Payload encoding handed to persistence.
    pub codec: PayloadCodec,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_lifetime_secs: 3600,
            single_login: true,
            sweep_interval_secs: None,
            codec: PayloadCodec::Json,
        }
    }
}

impl SessionConfig {
    /// Build the runtime manager configuration.
    ///
    /// `identity_timeout` comes from the `[identity]` table, if present.
    pub fn to_manager_config(&self, identity: Option<&IdentityConfig>) -> ManagerConfig {
        let mut config = ManagerConfig::new()
            .with_max_lifetime(Duration::from_secs(self.max_lifetime_secs))
            .with_single_login(self.single_login)
            .with_codec(self.codec);

        if let Some(secs) = self.sweep_interval_secs {
            config = config.with_sweep_interval(Duration::from_secs(secs));
        }
        if let Some(identity) = identity {
            config = config.with_identity_timeout(identity.timeout());
        }

        config
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity Provider Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Identity-provider fallback.
///
/// ```toml
/// [identity]
/// endpoint = "https://auth.example.com/userinfo"
/// timeout_secs = 5
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// URL queried with `Authorization: Bearer <session id>`.
    pub endpoint: String,
    /// Upper bound on a single lookup.
    #[serde(default = "default_identity_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_identity_timeout_secs() -> u64 {
    5
}

impl IdentityConfig {
    /// Timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// How clients present their session id.
///
/// ```toml
/// [auth]
/// scheme = "DSSESSION"
/// query_param = "sid"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Authorization scheme token, matched case-insensitively.
    pub scheme: String,
    /// Query parameter checked before the header.
    pub query_param: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_AUTH_SCHEME.to_string(),
            query_param: DEFAULT_QUERY_PARAM.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP server configuration.
///
/// ```toml
/// [server]
/// bind = "127.0.0.1:8080"
/// snapshot_path = "sessions.json"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind: SocketAddr,
    /// File sessions are restored from at boot and written to on shutdown.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            snapshot_path: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration.
///
/// ```toml
/// [logging]
/// filter = "warden=info,warden_session=debug"
/// json = false
/// directory = "/var/log/warden"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string.
    pub filter: String,
    /// Emit JSON lines on the console instead of human-readable output.
    pub json: bool,
    /// Also write daily-rotated JSON logs into this directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warden=info,warden_session=info,warden_server=info,warn".to_string(),
            json: false,
            directory: None,
        }
    }
}
