//! In-process session manager for HTTP services.
//!
//! This crate keeps server-side session records keyed by an opaque
//! identifier, with:
//! - single-login enforcement (one live session per user)
//! - TTL expiry, checked on lookup and by a background sweeper
//! - persistence hooks fired on create, update, save and delete
//! - restore of persisted sessions at startup
//! - an optional identity-provider fallback for unknown identifiers
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_session::{ManagerConfig, SessionManager};
//!
//! let config = ManagerConfig::default()
//!     .with_max_lifetime(Duration::from_secs(1800))
//!     .with_single_login(true);
//!
//! let manager = SessionManager::new(config);
//! let sweeper = manager.spawn_sweeper()?;
//!
//! let session = manager.start_session("alice", None).await;
//! session.put_data("theme", serde_json::json!("dark"));
//! ```

mod codec;
mod config;
mod error;
mod hooks;
mod id;
mod identity;
mod manager;
mod record;
mod sweep;

pub use codec::{Payload, PayloadCodec};
pub use config::{DEFAULT_AUTH_SCHEME, DEFAULT_QUERY_PARAM, ManagerConfig};
pub use error::{Error, Result};
pub use hooks::{DeleteReason, NoHooks, PersistenceHooks};
pub use id::{ID_PART_RANGE, generate_session_id};
pub use identity::{HttpIdentityProvider, IdentityProvider, PassportInfo};
pub use manager::{PASSPORT_KEY, Restored, SessionManager, SessionManagerBuilder, SessionSnapshot};
pub use record::SessionRecord;
pub use sweep::SweeperHandle;
