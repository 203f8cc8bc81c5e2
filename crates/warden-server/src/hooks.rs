//! Persistence hooks that mirror lifecycle events into the log.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use warden_session::{DeleteReason, PersistenceHooks, Result};

/// Logs every session lifecycle event.
///
/// Useful on its own for auditing, or as the hook set of a deployment that
/// keeps sessions in memory only.
#[derive(Debug, Clone, Default)]
pub struct TracingHooks;

impl PersistenceHooks for TracingHooks {
    fn on_create(&self, session_id: &str, user_id: &str) -> Result<()> {
        info!(session_id, user_id, "Session created");
        Ok(())
    }

    fn on_update(&self, session_id: &str, accessed_at: DateTime<Utc>) -> Result<()> {
        debug!(session_id, accessed_at = %accessed_at, "Session touched");
        Ok(())
    }

    fn on_save(&self, session_id: &str, payload: &[u8]) -> Result<()> {
        debug!(session_id, bytes = payload.len(), "Session payload saved");
        Ok(())
    }

    fn on_delete(&self, session_id: &str, reason: DeleteReason) -> Result<()> {
        info!(session_id, reason = %reason, "Session deleted");
        Ok(())
    }
}
