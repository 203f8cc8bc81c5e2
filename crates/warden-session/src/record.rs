//! The session record: identity, payload and last-access time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::codec::Payload;
use crate::manager::{ManagerShared, SessionManager};

struct RecordInner {
    id: String,
    user_id: String,
    created_at: DateTime<Utc>,
    last_accessed: Mutex<DateTime<Utc>>,
    /// Also serializes save hooks against each other and against eviction.
    payload: Mutex<Payload>,
    /// Cleared by the manager, under its lock and the payload lock, when the
    /// record is evicted.
    live: AtomicBool,
    manager: Weak<ManagerShared>,
}

/// Handle to a session record.
///
/// Cloning is cheap; all clones share the same state. The manager owns the
/// live set: once a record is evicted, handles still held by callers become
/// stale snapshots. Their payload can still be read and changed locally, but
/// no save hook fires and the manager never hands the record out again.
#[derive(Clone)]
pub struct SessionRecord {
    inner: Arc<RecordInner>,
}

impl SessionRecord {
    pub(crate) fn new(
        id: String,
        user_id: String,
        last_accessed: DateTime<Utc>,
        payload: Payload,
        manager: Weak<ManagerShared>,
    ) -> Self {
        Self {
            inner: Arc::new(RecordInner {
                id,
                user_id,
                created_at: Utc::now(),
                last_accessed: Mutex::new(last_accessed),
                payload: Mutex::new(payload),
                live: AtomicBool::new(true),
                manager,
            }),
        }
    }

    /// The session identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The user that owns this session.
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// When the record was created or restored in this process.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// When the session was last resolved.
    pub fn last_accessed(&self) -> DateTime<Utc> {
        *self.inner.last_accessed.lock()
    }

    /// Whether the record is still in its manager's live set.
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Whether `last_accessed + max_lifetime` lies before `now`.
    pub fn is_expired_at(&self, max_lifetime: Duration, now: DateTime<Utc>) -> bool {
        let lifetime = TimeDelta::from_std(max_lifetime).unwrap_or(TimeDelta::MAX);
        match self.last_accessed().checked_add_signed(lifetime) {
            Some(deadline) => deadline < now,
            None => false,
        }
    }

    /// Whether the session has been idle longer than `max_lifetime`.
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.is_expired_at(max_lifetime, Utc::now())
    }

    /// Check whether `key` is present in the payload.
    pub fn has_data(&self, key: &str) -> bool {
        self.inner.payload.lock().contains_key(key)
    }

    /// Get a copy of the value stored under `key`.
    pub fn get_data(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.payload.lock().get(key).cloned()
    }

    /// Keys currently in the payload.
    pub fn data_keys(&self) -> Vec<String> {
        self.inner.payload.lock().keys().cloned().collect()
    }

    /// Copy of the whole payload.
    pub fn payload(&self) -> Payload {
        self.inner.payload.lock().clone()
    }

    /// Store `value` under `key` and fire the save hook with the full payload.
    ///
    /// The hook runs before the payload lock is released, so the store sees
    /// saves in mutation order.
    pub fn put_data(&self, key: impl Into<String>, value: serde_json::Value) {
        let key = key.into();
        trace!(session_id = %self.inner.id, key = %key, "Putting session data");
        let mut payload = self.inner.payload.lock();
        payload.insert(key, value);
        self.save_locked(&payload);
    }

    /// Remove `key` and fire the save hook if anything changed.
    pub fn remove_data(&self, key: &str) {
        let mut payload = self.inner.payload.lock();
        if payload.remove(key).is_some() {
            trace!(session_id = %self.inner.id, key = %key, "Removed session data");
            self.save_locked(&payload);
        }
    }

    /// End this session through its owning manager.
    pub async fn close(&self) {
        match self.inner.manager.upgrade() {
            Some(shared) => SessionManager::from_shared(shared).end_session(self.id()).await,
            None => debug!(session_id = %self.inner.id, "Manager gone, nothing to close"),
        }
    }

    pub(crate) fn touch(&self, now: DateTime<Utc>) {
        *self.inner.last_accessed.lock() = now;
    }

    /// Waits for an in-flight save, so no save hook fires after this returns.
    pub(crate) fn mark_evicted(&self) {
        let _payload = self.inner.payload.lock();
        self.inner.live.store(false, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn same_record(&self, other: &SessionRecord) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Encode the full payload and hand it to the save hook.
    ///
    /// Callers hold the payload lock, which `mark_evicted` also takes.
    fn save_locked(&self, payload: &Payload) {
        if !self.is_live() {
            debug!(session_id = %self.inner.id, "Session no longer live, skipping save");
            return;
        }
        let Some(shared) = self.inner.manager.upgrade() else {
            return;
        };

        let bytes = match shared.config.codec.encode(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(session_id = %self.inner.id, error = %e, "Failed to encode session payload");
                return;
            }
        };

        if let Err(e) = shared.hooks.on_save(&self.inner.id, &bytes) {
            warn!(session_id = %self.inner.id, error = %e, "on_save hook failed");
        }
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.user_id)
            .field("last_accessed", &self.last_accessed())
            .field("live", &self.is_live())
            .finish()
    }
}
