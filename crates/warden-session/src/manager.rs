//! Session manager: the registry of live sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use crate::codec::Payload;
use crate::config::ManagerConfig;
use crate::hooks::{DeleteReason, NoHooks, PersistenceHooks};
use crate::id::generate_session_id;
use crate::identity::{IdentityProvider, PassportInfo};
use crate::record::SessionRecord;

/// Payload key under which the identity-provider passport is stored.
pub const PASSPORT_KEY: &str = "passport_info";

type SessionMap = HashMap<String, SessionRecord>;

/// State shared between the manager, its records and the sweeper.
pub(crate) struct ManagerShared {
    pub(crate) sessions: RwLock<SessionMap>,
    pub(crate) config: ManagerConfig,
    pub(crate) hooks: Arc<dyn PersistenceHooks>,
    pub(crate) identity: Option<Arc<dyn IdentityProvider>>,
    pub(crate) sweeper_active: AtomicBool,
}

/// Outcome of [`SessionManager::restore_session`].
#[derive(Debug, Clone)]
pub enum Restored {
    /// The record was rebuilt with its full payload.
    Intact(SessionRecord),
    /// The payload could not be decoded; the record starts empty.
    Degraded {
        /// The restored record, with an empty payload.
        record: SessionRecord,
        /// Why the payload was dropped.
        reason: String,
    },
}

impl Restored {
    /// The restored record, degraded or not.
    pub fn record(&self) -> &SessionRecord {
        match self {
            Restored::Intact(record) | Restored::Degraded { record, .. } => record,
        }
    }

    /// Consume the outcome and return the record.
    pub fn into_record(self) -> SessionRecord {
        match self {
            Restored::Intact(record) | Restored::Degraded { record, .. } => record,
        }
    }

    /// Whether the payload was lost during restore.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Restored::Degraded { .. })
    }
}

/// Exported state of a live session, suitable for writing to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub user_id: String,
    pub last_accessed: DateTime<Utc>,
    /// Payload encoded with the manager's codec.
    pub payload: Vec<u8>,
}

/// Builder for a [`SessionManager`] with hooks and an identity provider.
pub struct SessionManagerBuilder {
    config: ManagerConfig,
    hooks: Arc<dyn PersistenceHooks>,
    identity: Option<Arc<dyn IdentityProvider>>,
}

impl SessionManagerBuilder {
    /// Set the persistence hooks.
    pub fn with_hooks(mut self, hooks: impl PersistenceHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Set the identity provider consulted on lookup misses.
    pub fn with_identity_provider(mut self, provider: impl IdentityProvider + 'static) -> Self {
        self.identity = Some(Arc::new(provider));
        self
    }

    /// Build the manager.
    pub fn build(self) -> SessionManager {
        SessionManager {
            shared: Arc::new(ManagerShared {
                sessions: RwLock::new(HashMap::new()),
                config: self.config,
                hooks: self.hooks,
                identity: self.identity,
                sweeper_active: AtomicBool::new(false),
            }),
        }
    }
}

/// Registry of live sessions.
///
/// Every operation that reads or refreshes a session takes the single
/// write lock, so operations are totally ordered. Hooks run synchronously
/// while that lock is held; a failing hook is logged and ignored.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<ManagerShared>,
}

impl SessionManager {
    /// Create a manager with no hooks and no identity provider.
    pub fn new(config: ManagerConfig) -> Self {
        Self::builder(config).build()
    }

    /// Create a manager with persistence hooks.
    pub fn with_hooks(config: ManagerConfig, hooks: impl PersistenceHooks + 'static) -> Self {
        Self::builder(config).with_hooks(hooks).build()
    }

    /// Start building a manager.
    pub fn builder(config: ManagerConfig) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            hooks: Arc::new(NoHooks),
            identity: None,
        }
    }

    pub(crate) fn from_shared(shared: Arc<ManagerShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<ManagerShared> {
        &self.shared
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Start a new session for `user_id`.
    ///
    /// With single-login enabled, any existing session of the same user is
    /// erased in the same critical section that inserts the new one.
    pub async fn start_session(
        &self,
        user_id: impl Into<String>,
        initial_payload: Option<Payload>,
    ) -> SessionRecord {
        let user_id = user_id.into();
        let mut sessions = self.shared.sessions.write().await;

        if self.shared.config.single_login {
            self.erase_user_locked(&mut sessions, &user_id);
        }

        let id = generate_session_id(&mut rand::rng(), &*sessions);
        let has_payload = initial_payload.is_some();
        let record = SessionRecord::new(
            id.clone(),
            user_id.clone(),
            Utc::now(),
            initial_payload.unwrap_or_default(),
            Arc::downgrade(&self.shared),
        );
        sessions.insert(id.clone(), record.clone());

        debug!(
            session_id = %id,
            user_id = %user_id,
            live = sessions.len(),
            "Session started"
        );

        if let Err(e) = self.shared.hooks.on_create(&id, &user_id) {
            warn!(session_id = %id, error = %e, "on_create hook failed");
        }
        if has_payload {
            self.save_locked(&record);
        }

        record
    }

    /// Resolve `session_id` and refresh its last-access time.
    ///
    /// A record past its deadline counts as absent even if the sweeper has
    /// not run yet: it is evicted here with [`DeleteReason::Timeout`].
    /// On a miss the identity provider, if any, is consulted without
    /// holding the lock.
    pub async fn get_session(&self, session_id: &str) -> Option<SessionRecord> {
        {
            let mut sessions = self.shared.sessions.write().await;
            if let Some(record) = self.touch_locked(&mut sessions, session_id) {
                return Some(record);
            }
        }

        let provider = self.shared.identity.as_ref()?;
        let passport = self.resolve_identity(provider.as_ref(), session_id).await?;

        let mut sessions = self.shared.sessions.write().await;

        // Another task may have minted it while we were waiting.
        if let Some(record) = self.touch_locked(&mut sessions, session_id) {
            return Some(record);
        }

        if self.shared.config.single_login {
            self.erase_user_locked(&mut sessions, &passport.passport_id);
        }

        let mut payload = Payload::new();
        match serde_json::to_value(&passport) {
            Ok(value) => {
                payload.insert(PASSPORT_KEY.to_string(), value);
            }
            Err(e) => warn!(error = %e, "Failed to store passport in session payload"),
        }

        let record = SessionRecord::new(
            session_id.to_string(),
            passport.passport_id.clone(),
            Utc::now(),
            payload,
            Arc::downgrade(&self.shared),
        );
        sessions.insert(session_id.to_string(), record.clone());

        debug!(
            session_id = %session_id,
            user_id = %passport.passport_id,
            "Session created from identity provider"
        );

        if let Err(e) = self.shared.hooks.on_create(session_id, &passport.passport_id) {
            warn!(session_id = %session_id, error = %e, "on_create hook failed");
        }
        self.save_locked(&record);

        Some(record)
    }

    /// End a session. Unknown identifiers are ignored.
    pub async fn end_session(&self, session_id: &str) {
        let mut sessions = self.shared.sessions.write().await;
        if self
            .remove_locked(&mut sessions, session_id, DeleteReason::Closed)
            .is_none()
        {
            trace!(session_id = %session_id, "end_session for unknown session");
        }
    }

    /// Force-logout: remove the first session owned by `user_id`.
    ///
    /// Returns whether a session was removed.
    pub async fn erase_by_user(&self, user_id: &str) -> bool {
        let mut sessions = self.shared.sessions.write().await;
        self.erase_user_locked(&mut sessions, user_id)
    }

    /// Rebuild a session from persisted state, bypassing id generation.
    ///
    /// A payload that fails to decode is dropped: the record is still
    /// inserted, with an empty payload, and the outcome is
    /// [`Restored::Degraded`]. No create or save hook fires.
    pub async fn restore_session(
        &self,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        last_accessed: DateTime<Utc>,
        payload: &[u8],
    ) -> Restored {
        let session_id = session_id.into();
        let user_id = user_id.into();

        let (decoded, failure) = if payload.is_empty() {
            (Payload::new(), None)
        } else {
            match self.shared.config.codec.decode(payload) {
                Ok(decoded) => (decoded, None),
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        error = %e,
                        "Failed to decode persisted payload, restoring empty"
                    );
                    (Payload::new(), Some(e.to_string()))
                }
            }
        };

        let mut sessions = self.shared.sessions.write().await;

        if let Some(previous) = sessions.remove(&session_id) {
            previous.mark_evicted();
        }
        if self.shared.config.single_login {
            self.erase_user_locked(&mut sessions, &user_id);
        }

        let record = SessionRecord::new(
            session_id.clone(),
            user_id,
            last_accessed,
            decoded,
            Arc::downgrade(&self.shared),
        );
        sessions.insert(session_id.clone(), record.clone());

        debug!(session_id = %session_id, degraded = failure.is_some(), "Session restored");

        match failure {
            None => Restored::Intact(record),
            Some(reason) => Restored::Degraded { record, reason },
        }
    }

    /// Evict every session past its deadline.
    ///
    /// Returns the number of evicted sessions.
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.shared.sessions.write().await;
        let now = Utc::now();
        let max_lifetime = self.shared.config.max_lifetime;

        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, record)| record.is_expired_at(max_lifetime, now))
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in &expired {
            self.remove_locked(&mut sessions, session_id, DeleteReason::Timeout);
        }

        if !expired.is_empty() {
            info!(count = expired.len(), live = sessions.len(), "Swept expired sessions");
        }

        expired.len()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.shared.sessions.read().await.len()
    }

    /// Whether there are no live sessions.
    pub async fn is_empty(&self) -> bool {
        self.shared.sessions.read().await.is_empty()
    }

    /// Whether `session_id` is in the live set. Does not refresh it.
    pub async fn contains(&self, session_id: &str) -> bool {
        self.shared.sessions.read().await.contains_key(session_id)
    }

    /// Look at a session without refreshing it or firing hooks.
    pub async fn peek(&self, session_id: &str) -> Option<SessionRecord> {
        self.shared.sessions.read().await.get(session_id).cloned()
    }

    /// Identifiers of every live session owned by `user_id`.
    pub async fn sessions_for_user(&self, user_id: &str) -> Vec<String> {
        self.shared
            .sessions
            .read()
            .await
            .values()
            .filter(|record| record.user_id() == user_id)
            .map(|record| record.id().to_string())
            .collect()
    }

    /// Export every live session with its payload encoded by the codec.
    ///
    /// Sessions whose payload fails to encode are skipped with a warning.
    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        let sessions = self.shared.sessions.read().await;
        let codec = self.shared.config.codec;

        sessions
            .values()
            .filter_map(|record| match codec.encode(&record.payload()) {
                Ok(payload) => Some(SessionSnapshot {
                    id: record.id().to_string(),
                    user_id: record.user_id().to_string(),
                    last_accessed: record.last_accessed(),
                    payload,
                }),
                Err(e) => {
                    warn!(session_id = %record.id(), error = %e, "Skipping session in snapshot");
                    None
                }
            })
            .collect()
    }

    fn touch_locked(&self, sessions: &mut SessionMap, session_id: &str) -> Option<SessionRecord> {
        let record = sessions.get(session_id)?.clone();

        if record.is_expired(self.shared.config.max_lifetime) {
            debug!(session_id = %session_id, "Session expired before sweep, evicting");
            self.remove_locked(sessions, session_id, DeleteReason::Timeout);
            return None;
        }

        let now = Utc::now();
        record.touch(now);
        trace!(session_id = %session_id, "Session resolved");

        if let Err(e) = self.shared.hooks.on_update(session_id, now) {
            warn!(session_id = %session_id, error = %e, "on_update hook failed");
        }

        Some(record)
    }

    fn remove_locked(
        &self,
        sessions: &mut SessionMap,
        session_id: &str,
        reason: DeleteReason,
    ) -> Option<SessionRecord> {
        let record = sessions.remove(session_id)?;
        record.mark_evicted();

        debug!(
            session_id = %session_id,
            user_id = %record.user_id(),
            reason = %reason,
            "Session removed"
        );

        if let Err(e) = self.shared.hooks.on_delete(session_id, reason) {
            warn!(session_id = %session_id, reason = %reason, error = %e, "on_delete hook failed");
        }

        Some(record)
    }

    fn erase_user_locked(&self, sessions: &mut SessionMap, user_id: &str) -> bool {
        let found = sessions
            .iter()
            .find(|(_, record)| record.user_id() == user_id)
            .map(|(id, _)| id.clone());

        match found {
            Some(session_id) => self
                .remove_locked(sessions, &session_id, DeleteReason::Erased)
                .is_some(),
            None => false,
        }
    }

    /// Fire the save hook for a record the caller just inserted.
    fn save_locked(&self, record: &SessionRecord) {
        match self.shared.config.codec.encode(&record.payload()) {
            Ok(bytes) => {
                if let Err(e) = self.shared.hooks.on_save(record.id(), &bytes) {
                    warn!(session_id = %record.id(), error = %e, "on_save hook failed");
                }
            }
            Err(e) => {
                warn!(session_id = %record.id(), error = %e, "Failed to encode session payload")
            }
        }
    }

    async fn resolve_identity(
        &self,
        provider: &dyn IdentityProvider,
        session_id: &str,
    ) -> Option<PassportInfo> {
        let timeout = self.shared.config.identity_timeout;
        match tokio::time::timeout(timeout, provider.resolve(session_id)).await {
            Ok(Ok(Some(passport))) => Some(passport),
            Ok(Ok(None)) => {
                debug!(session_id = %session_id, "Identity provider does not know token");
                None
            }
            Ok(Err(e)) => {
                warn!(session_id = %session_id, error = %e, "Identity provider lookup failed");
                None
            }
            Err(_) => {
                warn!(
                    session_id = %session_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Identity provider lookup timed out"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.shared.config)
            .field("identity_provider", &self.shared.identity.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PayloadCodec;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::sleep;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Create(String, String),
        Update(String),
        Save(String, Vec<u8>),
        Delete(String, DeleteReason),
    }

    #[derive(Default)]
    struct RecordingHooks {
        events: Mutex<Vec<Event>>,
        fail: bool,
    }

    impl RecordingHooks {
        fn failing() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }

        fn deletes(&self) -> Vec<(String, DeleteReason)> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Delete(id, reason) => Some((id, reason)),
                    _ => None,
                })
                .collect()
        }

        fn record(&self, event: Event) -> Result<()> {
            self.events.lock().push(event);
            if self.fail {
                Err(Error::Persistence("store offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl PersistenceHooks for RecordingHooks {
        fn on_create(&self, session_id: &str, user_id: &str) -> Result<()> {
            self.record(Event::Create(session_id.to_string(), user_id.to_string()))
        }

        fn on_update(&self, session_id: &str, _accessed_at: DateTime<Utc>) -> Result<()> {
            self.record(Event::Update(session_id.to_string()))
        }

        fn on_save(&self, session_id: &str, payload: &[u8]) -> Result<()> {
            self.record(Event::Save(session_id.to_string(), payload.to_vec()))
        }

        fn on_delete(&self, session_id: &str, reason: DeleteReason) -> Result<()> {
            self.record(Event::Delete(session_id.to_string(), reason))
        }
    }

    fn recording_manager(config: ManagerConfig) -> (SessionManager, Arc<RecordingHooks>) {
        let hooks = Arc::new(RecordingHooks::default());
        (SessionManager::with_hooks(config, hooks.clone()), hooks)
    }

    #[tokio::test]
    async fn test_start_then_get() {
        let (manager, hooks) = recording_manager(ManagerConfig::new());

        let record = manager.start_session("u1", None).await;
        let found = manager.get_session(record.id()).await.unwrap();

        assert_eq!(found.user_id(), "u1");
        assert!(found.same_record(&record));
        assert_eq!(
            hooks.events(),
            vec![
                Event::Create(record.id().to_string(), "u1".to_string()),
                Event::Update(record.id().to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_get_refreshes_last_accessed() {
        let manager = SessionManager::new(ManagerConfig::new());
        let record = manager.start_session("u1", None).await;
        let before = record.last_accessed();

        sleep(Duration::from_millis(10)).await;
        manager.get_session(record.id()).await.unwrap();

        assert!(record.last_accessed() > before);
    }

    #[tokio::test]
    async fn test_payload_mutation_does_not_refresh() {
        let manager = SessionManager::new(ManagerConfig::new());
        let record = manager.start_session("u1", None).await;
        let before = record.last_accessed();

        sleep(Duration::from_millis(10)).await;
        record.put_data("k", json!(1));

        assert_eq!(record.last_accessed(), before);
    }

    #[tokio::test]
    async fn test_get_unknown_is_none() {
        let (manager, hooks) = recording_manager(ManagerConfig::new());
        assert!(manager.get_session("1.2.3").await.is_none());
        assert!(manager.is_empty().await);
        assert!(hooks.events().is_empty());
    }

    #[tokio::test]
    async fn test_end_then_get_is_none() {
        let (manager, hooks) = recording_manager(ManagerConfig::new());
        let record = manager.start_session("u1", None).await;

        manager.end_session(record.id()).await;

        assert!(manager.get_session(record.id()).await.is_none());
        assert!(!record.is_live());
        assert_eq!(
            hooks.deletes(),
            vec![(record.id().to_string(), DeleteReason::Closed)]
        );
    }

    #[tokio::test]
    async fn test_end_unknown_is_noop() {
        let (manager, hooks) = recording_manager(ManagerConfig::new());
        manager.end_session("9.9.9").await;
        assert!(hooks.deletes().is_empty());
    }

    #[tokio::test]
    async fn test_close_ends_session() {
        let (manager, hooks) = recording_manager(ManagerConfig::new());
        let record = manager.start_session("u1", None).await;

        record.close().await;

        assert!(!manager.contains(record.id()).await);
        assert_eq!(
            hooks.deletes(),
            vec![(record.id().to_string(), DeleteReason::Closed)]
        );
    }

    #[tokio::test]
    async fn test_single_login_replaces_predecessor() {
        let (manager, hooks) = recording_manager(ManagerConfig::new().with_single_login(true));

        let first = manager.start_session("u1", None).await;
        let second = manager.start_session("u1", None).await;

        assert_ne!(first.id(), second.id());
        assert!(manager.get_session(first.id()).await.is_none());
        let found = manager.get_session(second.id()).await.unwrap();
        assert!(found.same_record(&second));
        assert_eq!(
            hooks.deletes(),
            vec![(first.id().to_string(), DeleteReason::Erased)]
        );
        assert!(!first.is_live());
    }

    #[tokio::test]
    async fn test_single_login_holds_after_every_start() {
        let manager = SessionManager::new(ManagerConfig::new().with_single_login(true));

        for _ in 0..20 {
            manager.start_session("u1", None).await;
            manager.start_session("u2", None).await;
            assert_eq!(manager.sessions_for_user("u1").await.len(), 1);
            assert_eq!(manager.sessions_for_user("u2").await.len(), 1);
        }
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn test_single_login_under_concurrency() {
        let manager = SessionManager::new(ManagerConfig::new().with_single_login(true));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                manager.start_session("u1", None).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(manager.sessions_for_user("u1").await.len(), 1);
    }

    /// Store whose save hook is slow for single-key payloads.
    #[derive(Default)]
    struct SlowStore {
        log: Mutex<Vec<String>>,
    }

    impl SlowStore {
        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    impl PersistenceHooks for SlowStore {
        fn on_save(&self, _session_id: &str, payload: &[u8]) -> Result<()> {
            let decoded = PayloadCodec::Json.decode(payload)?;
            if decoded.len() == 1 {
                std::thread::sleep(Duration::from_millis(150));
            }
            let mut keys: Vec<_> = decoded.keys().cloned().collect();
            keys.sort();
            self.log.lock().push(format!("save[{}]", keys.join(",")));
            Ok(())
        }

        fn on_delete(&self, _session_id: &str, reason: DeleteReason) -> Result<()> {
            self.log.lock().push(format!("delete:{reason}"));
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_saves_reach_store_in_order() {
        let store = Arc::new(SlowStore::default());
        let manager = SessionManager::with_hooks(ManagerConfig::new(), store.clone());
        let record = manager.start_session("u1", None).await;

        let writer = record.clone();
        let first = std::thread::spawn(move || writer.put_data("a", json!(1)));
        sleep(Duration::from_millis(50)).await;
        record.put_data("b", json!(2));
        first.join().unwrap();

        assert_eq!(store.log(), vec!["save[a]", "save[a,b]"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_save_after_delete() {
        let store = Arc::new(SlowStore::default());
        let manager = SessionManager::with_hooks(ManagerConfig::new(), store.clone());
        let record = manager.start_session("u1", None).await;

        let writer = record.clone();
        let slow = std::thread::spawn(move || writer.put_data("a", json!(1)));
        sleep(Duration::from_millis(50)).await;
        manager.end_session(record.id()).await;
        slow.join().unwrap();

        // The in-flight save finishes first; nothing is saved afterwards.
        record.put_data("b", json!(2));
        assert_eq!(store.log(), vec!["save[a]", "delete:closed"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweep_and_lookup_race_has_one_outcome() {
        let lifetime = Duration::from_millis(30);

        for round in 0..20u64 {
            let (manager, hooks) =
                recording_manager(ManagerConfig::new().with_max_lifetime(lifetime));
            let record = manager.start_session("u1", None).await;

            // Land on either side of the deadline.
            sleep(Duration::from_millis(25 + round % 10)).await;

            let sweeper = manager.clone();
            let sweep = tokio::spawn(async move { sweeper.sweep().await });
            let looker = manager.clone();
            let id = record.id().to_string();
            let lookup = tokio::spawn(async move { looker.get_session(&id).await });

            let swept = sweep.await.unwrap();
            let found = lookup.await.unwrap();
            let deletes = hooks.deletes();

            match found {
                Some(found) => {
                    assert_eq!(swept, 0);
                    assert!(found.is_live());
                    assert!(manager.contains(record.id()).await);
                    assert!(deletes.is_empty());
                }
                None => {
                    assert!(!record.is_live());
                    assert!(!manager.contains(record.id()).await);
                    assert_eq!(
                        deletes,
                        vec![(record.id().to_string(), DeleteReason::Timeout)]
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn test_multi_login_allowed_when_disabled() {
        let manager = SessionManager::new(ManagerConfig::new().with_single_login(false));

        let first = manager.start_session("u1", None).await;
        let second = manager.start_session("u1", None).await;

        assert!(manager.get_session(first.id()).await.is_some());
        assert!(manager.get_session(second.id()).await.is_some());
        assert_eq!(manager.sessions_for_user("u1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_erase_by_user() {
        let (manager, hooks) = recording_manager(ManagerConfig::new());
        let record = manager.start_session("u1", None).await;

        assert!(manager.erase_by_user("u1").await);
        assert!(!manager.erase_by_user("u1").await);
        assert!(manager.get_session(record.id()).await.is_none());
        assert_eq!(
            hooks.deletes(),
            vec![(record.id().to_string(), DeleteReason::Erased)]
        );
    }

    #[tokio::test]
    async fn test_put_and_remove_fire_save_with_full_payload() {
        let (manager, hooks) = recording_manager(ManagerConfig::new());
        let record = manager.start_session("u1", None).await;

        record.put_data("a", json!(1));
        record.put_data("b", json!("two"));
        record.remove_data("a");
        record.remove_data("missing");

        let saves: Vec<Payload> = hooks
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Save(_, bytes) => Some(PayloadCodec::Json.decode(&bytes).unwrap()),
                _ => None,
            })
            .collect();

        assert_eq!(saves.len(), 3);
        assert_eq!(saves[1].len(), 2);
        assert_eq!(saves[2].get("b"), Some(&json!("two")));
        assert!(!saves[2].contains_key("a"));
    }

    #[tokio::test]
    async fn test_initial_payload_is_saved() {
        let (manager, hooks) = recording_manager(ManagerConfig::new());
        let mut payload = Payload::new();
        payload.insert("role".to_string(), json!("admin"));

        let record = manager.start_session("u1", Some(payload)).await;

        assert_eq!(record.get_data("role"), Some(json!("admin")));
        assert!(
            hooks
                .events()
                .iter()
                .any(|e| matches!(e, Event::Save(id, _) if id == record.id()))
        );
    }

    #[tokio::test]
    async fn test_stale_record_does_not_save() {
        let (manager, hooks) = recording_manager(ManagerConfig::new());
        let record = manager.start_session("u1", None).await;
        manager.end_session(record.id()).await;

        record.put_data("k", json!(1));

        assert_eq!(record.get_data("k"), Some(json!(1)));
        assert!(
            !hooks
                .events()
                .iter()
                .any(|e| matches!(e, Event::Save(..)))
        );
    }

    #[tokio::test]
    async fn test_hook_failures_are_not_fatal() {
        let hooks = Arc::new(RecordingHooks::failing());
        let manager = SessionManager::with_hooks(ManagerConfig::new(), hooks.clone());

        let record = manager.start_session("u1", None).await;
        record.put_data("k", json!(1));
        assert!(manager.get_session(record.id()).await.is_some());
        let second = manager.start_session("u1", None).await;
        manager.end_session(second.id()).await;

        assert!(manager.is_empty().await);
        assert_eq!(record.get_data("k"), Some(json!(1)));
        assert_eq!(hooks.events().len(), 6);
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired() {
        let (manager, hooks) = recording_manager(
            ManagerConfig::new().with_max_lifetime(Duration::from_millis(50)),
        );
        let record = manager.start_session("u1", None).await;

        sleep(Duration::from_millis(100)).await;

        assert_eq!(manager.sweep().await, 1);
        assert!(!manager.contains(record.id()).await);
        assert!(manager.get_session(record.id()).await.is_none());
        assert_eq!(
            hooks.deletes(),
            vec![(record.id().to_string(), DeleteReason::Timeout)]
        );
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_sessions() {
        let manager =
            SessionManager::new(ManagerConfig::new().with_max_lifetime(Duration::from_secs(60)));
        manager.start_session("u1", None).await;
        manager.start_session("u2", None).await;

        assert_eq!(manager.sweep().await, 0);
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn test_get_treats_expired_as_absent_before_sweep() {
        let (manager, hooks) = recording_manager(
            ManagerConfig::new().with_max_lifetime(Duration::from_millis(50)),
        );
        let record = manager.start_session("u1", None).await;

        sleep(Duration::from_millis(100)).await;

        assert!(manager.get_session(record.id()).await.is_none());
        assert!(!manager.contains(record.id()).await);
        assert_eq!(manager.sweep().await, 0);
        assert_eq!(
            hooks.deletes(),
            vec![(record.id().to_string(), DeleteReason::Timeout)]
        );
    }

    #[tokio::test]
    async fn test_access_keeps_session_alive() {
        let manager = SessionManager::new(
            ManagerConfig::new().with_max_lifetime(Duration::from_millis(150)),
        );
        let record = manager.start_session("u1", None).await;

        for _ in 0..3 {
            sleep(Duration::from_millis(60)).await;
            assert!(manager.get_session(record.id()).await.is_some());
        }

        assert_eq!(manager.sweep().await, 0);
    }

    #[tokio::test]
    async fn test_restore_round_trip_through_hooks() {
        let (manager, hooks) = recording_manager(ManagerConfig::new());
        let record = manager.start_session("u1", None).await;
        record.put_data("cart", json!([1, 2]));

        let blob = hooks
            .events()
            .into_iter()
            .rev()
            .find_map(|e| match e {
                Event::Save(_, bytes) => Some(bytes),
                _ => None,
            })
            .unwrap();

        let fresh = SessionManager::new(ManagerConfig::new());
        let accessed = Utc::now();
        let restored = fresh
            .restore_session(record.id(), "u1", accessed, &blob)
            .await;

        assert!(!restored.is_degraded());
        let restored = restored.into_record();
        assert_eq!(restored.id(), record.id());
        assert_eq!(restored.last_accessed(), accessed);
        assert_eq!(restored.get_data("cart"), Some(json!([1, 2])));
        assert!(fresh.get_session(record.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_restore_corrupted_payload_is_degraded() {
        let (manager, hooks) = recording_manager(ManagerConfig::new());

        let restored = manager
            .restore_session("1.2.3", "u1", Utc::now(), b"\x00garbage")
            .await;

        assert!(restored.is_degraded());
        let record = restored.record();
        assert!(record.payload().is_empty());
        assert!(manager.get_session("1.2.3").await.is_some());
        assert!(
            !hooks
                .events()
                .iter()
                .any(|e| matches!(e, Event::Create(..) | Event::Save(..)))
        );
    }

    #[tokio::test]
    async fn test_restore_msgpack() {
        let config = ManagerConfig::new().with_codec(PayloadCodec::MessagePack);
        let manager = SessionManager::new(config);
        let mut payload = Payload::new();
        payload.insert("n".to_string(), json!(42));
        let blob = PayloadCodec::MessagePack.encode(&payload).unwrap();

        let restored = manager
            .restore_session("4.5.6", "u9", Utc::now(), &blob)
            .await;

        assert!(matches!(restored, Restored::Intact(_)));
        assert_eq!(restored.record().get_data("n"), Some(json!(42)));
    }

    #[tokio::test]
    async fn test_restore_empty_blob_is_intact() {
        let manager = SessionManager::new(ManagerConfig::new());
        let restored = manager.restore_session("1.1.1", "u1", Utc::now(), &[]).await;
        assert!(!restored.is_degraded());
    }

    #[tokio::test]
    async fn test_restore_replaces_same_id() {
        let manager = SessionManager::new(ManagerConfig::new().with_single_login(false));
        let first = manager
            .restore_session("1.1.1", "u1", Utc::now(), &[])
            .await
            .into_record();
        let second = manager
            .restore_session("1.1.1", "u2", Utc::now(), &[])
            .await
            .into_record();

        assert!(!first.is_live());
        assert_eq!(manager.len().await, 1);
        assert_eq!(manager.peek("1.1.1").await.unwrap().user_id(), "u2");
        assert!(second.is_live());
    }

    #[tokio::test]
    async fn test_restore_stale_timestamp_expires() {
        let manager = SessionManager::new(
            ManagerConfig::new().with_max_lifetime(Duration::from_secs(60)),
        );
        let long_ago = Utc::now() - chrono::TimeDelta::minutes(10);
        manager.restore_session("1.1.1", "u1", long_ago, &[]).await;

        assert_eq!(manager.sweep().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_restores_into_new_manager() {
        let manager = SessionManager::new(ManagerConfig::new());
        let a = manager.start_session("u1", None).await;
        a.put_data("x", json!({"y": true}));
        manager.start_session("u2", None).await;

        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.len(), 2);

        let fresh = SessionManager::new(ManagerConfig::new());
        for entry in &snapshot {
            let restored = fresh
                .restore_session(&entry.id, &entry.user_id, entry.last_accessed, &entry.payload)
                .await;
            assert!(!restored.is_degraded());
        }
        let copy = fresh.peek(a.id()).await.unwrap();
        assert_eq!(copy.get_data("x"), Some(json!({"y": true})));
    }

    #[tokio::test]
    async fn test_peek_does_not_fire_hooks() {
        let (manager, hooks) = recording_manager(ManagerConfig::new());
        let record = manager.start_session("u1", None).await;
        let before = hooks.events().len();

        assert!(manager.peek(record.id()).await.is_some());
        assert_eq!(hooks.events().len(), before);
    }

    // ── Identity provider fallback ─────────────────────────────────────────

    struct StaticProvider {
        known: HashMap<String, PassportInfo>,
        delay: Duration,
    }

    impl StaticProvider {
        fn with_token(token: &str, passport_id: &str) -> Self {
            let mut known = HashMap::new();
            known.insert(
                token.to_string(),
                PassportInfo {
                    passport_id: passport_id.to_string(),
                    identity_type: "email".to_string(),
                    identifier: format!("{passport_id}@example.com"),
                },
            );
            Self {
                known,
                delay: Duration::ZERO,
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn resolve(&self, token: &str) -> Result<Option<PassportInfo>> {
            sleep(self.delay).await;
            Ok(self.known.get(token).cloned())
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl IdentityProvider for BrokenProvider {
        async fn resolve(&self, _token: &str) -> Result<Option<PassportInfo>> {
            Err(Error::IdentityProvider("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_identity_fallback_creates_session() {
        let hooks = Arc::new(RecordingHooks::default());
        let manager = SessionManager::builder(ManagerConfig::new())
            .with_hooks(hooks.clone())
            .with_identity_provider(StaticProvider::with_token("tok-1", "p-42"))
            .build();

        let record = manager.get_session("tok-1").await.unwrap();

        assert_eq!(record.id(), "tok-1");
        assert_eq!(record.user_id(), "p-42");
        assert_eq!(
            record.get_data(PASSPORT_KEY).unwrap()["identity_type"],
            json!("email")
        );
        assert!(manager.contains("tok-1").await);
        assert!(hooks.events().contains(&Event::Create(
            "tok-1".to_string(),
            "p-42".to_string()
        )));

        // Second lookup hits the local map.
        let again = manager.get_session("tok-1").await.unwrap();
        assert!(again.same_record(&record));
    }

    #[tokio::test]
    async fn test_identity_fallback_unknown_token() {
        let manager = SessionManager::builder(ManagerConfig::new())
            .with_identity_provider(StaticProvider::with_token("tok-1", "p-42"))
            .build();

        assert!(manager.get_session("tok-2").await.is_none());
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_identity_fallback_error_is_not_found() {
        let manager = SessionManager::builder(ManagerConfig::new())
            .with_identity_provider(BrokenProvider)
            .build();

        assert!(manager.get_session("tok-1").await.is_none());
    }

    #[tokio::test]
    async fn test_identity_fallback_timeout_is_not_found() {
        let config = ManagerConfig::new().with_identity_timeout(Duration::from_millis(20));
        let manager = SessionManager::builder(config)
            .with_identity_provider(
                StaticProvider::with_token("tok-1", "p-42").slow(Duration::from_millis(500)),
            )
            .build();

        assert!(manager.get_session("tok-1").await.is_none());
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_identity_lookup_does_not_hold_lock() {
        let config = ManagerConfig::new().with_identity_timeout(Duration::from_secs(2));
        let manager = SessionManager::builder(config)
            .with_identity_provider(
                StaticProvider::with_token("tok-1", "p-42").slow(Duration::from_millis(300)),
            )
            .build();

        let slow = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_session("tok-1").await })
        };

        sleep(Duration::from_millis(50)).await;
        let started = std::time::Instant::now();
        let record = manager.start_session("u1", None).await;
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(manager.contains(record.id()).await);

        assert!(slow.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_identity_fallback_respects_single_login() {
        let manager = SessionManager::builder(ManagerConfig::new().with_single_login(true))
            .with_identity_provider(StaticProvider::with_token("tok-1", "p-42"))
            .build();

        let local = manager.start_session("p-42", None).await;
        let minted = manager.get_session("tok-1").await.unwrap();

        assert!(!local.is_live());
        assert_eq!(manager.sessions_for_user("p-42").await, vec![minted.id().to_string()]);
    }
}
