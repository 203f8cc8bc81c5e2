//! Configuration for the session manager.

use std::time::Duration;

use crate::codec::PayloadCodec;

/// Default maximum idle lifetime of a session (1 hour).
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(3600);

/// Default timeout for identity-provider lookups.
pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Lower bound for the derived sweep interval.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound for the derived sweep interval.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Default `Authorization` scheme token a client presents its session id with.
pub const DEFAULT_AUTH_SCHEME: &str = "DSSESSION";

/// Default query parameter carrying the session id.
pub const DEFAULT_QUERY_PARAM: &str = "sid";

/// Configuration for the session manager.
///
/// Fixed at construction and read-only afterwards.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long a session may stay idle before it expires.
    pub max_lifetime: Duration,

    /// Whether a user may own at most one live session.
    pub single_login: bool,

    /// Interval between sweeps. `None` derives it from `max_lifetime`.
    pub sweep_interval: Option<Duration>,

    /// Encoding used for payloads handed to the save hook and read on restore.
    pub codec: PayloadCodec,

    /// Upper bound on a single identity-provider lookup.
    pub identity_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_lifetime: DEFAULT_MAX_LIFETIME,
            single_login: true,
            sweep_interval: None,
            codec: PayloadCodec::default(),
            identity_timeout: DEFAULT_IDENTITY_TIMEOUT,
        }
    }
}

impl ManagerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum idle lifetime of a session.
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Enable or disable single-login enforcement.
    pub fn with_single_login(mut self, enabled: bool) -> Self {
        self.single_login = enabled;
        self
    }

    /// Set an explicit sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Set the payload codec.
    pub fn with_codec(mut self, codec: PayloadCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the identity-provider timeout.
    pub fn with_identity_timeout(mut self, timeout: Duration) -> Self {
        self.identity_timeout = timeout;
        self
    }

    /// The interval the sweeper actually ticks at.
    ///
    /// Without an explicit value this is the max lifetime clamped to
    /// between one minute and one hour.
    pub fn effective_sweep_interval(&self) -> Duration {
        self.sweep_interval
            .unwrap_or_else(|| self.max_lifetime.clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL))
    }
}
