//! Error types for session manager operations.

/// Error type for session manager operations.
///
/// None of these are fatal to the manager: hook and codec failures are
/// logged by the caller and the triggering operation still completes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A persistence hook reported a failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The payload could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The identity provider could not be reached or answered garbage.
    #[error("Identity provider error: {0}")]
    IdentityProvider(String),

    /// A sweeper task is already running for this manager.
    #[error("Sweeper already running for this manager")]
    SweeperRunning,

    /// The sweeper was started outside a tokio runtime.
    #[error("No tokio runtime to run the sweeper on")]
    NoRuntime,
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::IdentityProvider(e.to_string())
    }
}

/// Result type for session manager operations.
pub type Result<T> = std::result::Result<T, Error>;
