//! Background sweep of expired sessions.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::manager::{ManagerShared, SessionManager};

/// Handle to a running sweeper task.
///
/// Dropping the handle stops the task; [`shutdown`](Self::shutdown) stops it
/// and waits for it to finish. Either way the manager may start a new
/// sweeper as soon as the handle is gone.
#[derive(Debug)]
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    manager: Weak<ManagerShared>,
}

impl SweeperHandle {
    /// Whether the task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(shared) = self.manager.upgrade() {
            shared.sweeper_active.store(false, Ordering::Release);
        }
    }
}

impl SessionManager {
    /// Start the periodic sweep on the current tokio runtime.
    ///
    /// Ticks every [`ManagerConfig::effective_sweep_interval`]. Only one
    /// sweeper may run per manager; a second call while one is active
    /// returns [`Error::SweeperRunning`]. Outside a tokio runtime it returns
    /// [`Error::NoRuntime`]. The task holds a weak reference and exits on its
    /// own once every manager handle is dropped.
    ///
    /// [`ManagerConfig::effective_sweep_interval`]: crate::ManagerConfig::effective_sweep_interval
    pub fn spawn_sweeper(&self) -> Result<SweeperHandle> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let shared = self.shared();
        if shared.sweeper_active.swap(true, Ordering::AcqRel) {
            return Err(Error::SweeperRunning);
        }

        let period = shared.config.effective_sweep_interval();
        let weak = Arc::downgrade(shared);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        debug!(period_ms = period.as_millis() as u64, "Starting session sweeper");

        let task = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(shared) = weak.upgrade() else {
                            trace!("Manager dropped, sweeper exiting");
                            return;
                        };
                        SessionManager::from_shared(shared).sweep().await;
                    }
                }
            }

            debug!("Session sweeper stopped");
        });

        Ok(SweeperHandle {
            cancel,
            task: Some(task),
            manager: Arc::downgrade(shared),
        })
    }
}
