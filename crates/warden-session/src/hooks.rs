//! Persistence hooks fired on session lifecycle events.
//!
//! The manager never stores anything itself. A backing store (database,
//! file, cache) implements [`PersistenceHooks`] and the manager calls it
//! synchronously on the caller's task. A hook that returns an error is
//! logged and otherwise ignored: the triggering operation still completes.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;

/// Why a session was removed from the live set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeleteReason {
    /// Explicitly closed (logout).
    Closed,
    /// Removed because the same user logged in again, or force-logout.
    Erased,
    /// Idle longer than the configured max lifetime.
    Timeout,
}

impl std::fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteReason::Closed => write!(f, "closed"),
            DeleteReason::Erased => write!(f, "erased"),
            DeleteReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Callbacks a backing store implements to mirror session state.
///
/// Every method is optional; the defaults do nothing.
pub trait PersistenceHooks: Send + Sync {
    /// A new session was started for `user_id`.
    fn on_create(&self, _session_id: &str, _user_id: &str) -> Result<()> {
        Ok(())
    }

    /// A session was resolved and its last-access time refreshed.
    fn on_update(&self, _session_id: &str, _accessed_at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    /// The payload changed. `payload` is the full, encoded map.
    fn on_save(&self, _session_id: &str, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    /// A session left the live set.
    fn on_delete(&self, _session_id: &str, _reason: DeleteReason) -> Result<()> {
        Ok(())
    }
}

impl<T: PersistenceHooks + ?Sized> PersistenceHooks for Arc<T> {
    fn on_create(&self, session_id: &str, user_id: &str) -> Result<()> {
        (**self).on_create(session_id, user_id)
    }

    fn on_update(&self, session_id: &str, accessed_at: DateTime<Utc>) -> Result<()> {
        (**self).on_update(session_id, accessed_at)
    }

    fn on_save(&self, session_id: &str, payload: &[u8]) -> Result<()> {
        (**self).on_save(session_id, payload)
    }

    fn on_delete(&self, session_id: &str, reason: DeleteReason) -> Result<()> {
        (**self).on_delete(session_id, reason)
    }
}

/// A no-op hook set for purely in-memory sessions.
#[derive(Debug, Clone, Default)]
pub struct NoHooks;

impl PersistenceHooks for NoHooks {}
