//! Singleton run lock.
//!
//! In-memory only: a fresh process always starts unlocked.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::RunId;

/// Process-wide gate allowing at most one run at a time.
#[derive(Debug, Default)]
pub struct RunLock {
    holder: Mutex<Option<RunId>>,
}

impl RunLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slot(&self) -> MutexGuard<'_, Option<RunId>> {
        // A panic while holding the mutex cannot leave the Option half-written.
        self.holder.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acquire the lock for `run_id` if nobody holds it.
    ///
    /// The returned guard releases the lock when dropped.
    pub fn try_acquire(self: &Arc<Self>, run_id: RunId) -> Option<RunLockGuard> {
        let mut slot = self.slot();
        if let Some(current) = *slot {
            debug!(%run_id, holder = %current, "run lock busy");
            return None;
        }
        *slot = Some(run_id);
        debug!(%run_id, "run lock acquired");
        Some(RunLockGuard {
            lock: Arc::clone(self),
            run_id,
        })
    }

    /// Release the lock if `run_id` holds it. Returns whether it was released.
    pub fn release(&self, run_id: RunId) -> bool {
        let mut slot = self.slot();
        match *slot {
            Some(current) if current == run_id => {
                *slot = None;
                debug!(%run_id, "run lock released");
                true
            }
            Some(current) => {
                warn!(%run_id, holder = %current, "ignoring release from non-holder");
                false
            }
            None => false,
        }
    }

    /// The run currently holding the lock.
    pub fn holder(&self) -> Option<RunId> {
        *self.slot()
    }

    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }
}

/// Releases the run lock on drop, including on timeouts and panics.
#[derive(Debug)]
pub struct RunLockGuard {
    lock: Arc<RunLock>,
    run_id: RunId,
}

impl RunLockGuard {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.lock.release(self.run_id);
    }
}
