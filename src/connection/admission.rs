use std::sync::{Condvar, Mutex, MutexGuard};

use crate::error::{Result, TransportError};

/// Soft admission control for renters.
///
/// A renter holds the gate while it checks capacity and dequeues; if the
/// pool is over capacity it sleeps on the condvar instead of spinning and is
/// woken whenever the pooled count drops.
pub(crate) struct AdmissionGate {
    lock: Mutex<()>,
    wake: Condvar,
}

impl AdmissionGate {
    pub(crate) fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    /// Block while `over_capacity` holds, then return with the gate held.
    pub(crate) fn admit<F>(&self, over_capacity: F) -> Result<MutexGuard<'_, ()>>
    where
        F: Fn() -> bool,
    {
        let guard = self
            .lock
            .lock()
            .map_err(|_| TransportError::Poisoned("pool admission"))?;
        self.wake
            .wait_while(guard, |_| over_capacity())
            .map_err(|_| TransportError::Poisoned("pool admission"))
    }

    /// Wake every waiting renter so it re-checks capacity.
    ///
    /// Taking the lock first means a renter between its check and its wait
    /// cannot miss the notification.
    pub(crate) fn release_waiters(&self) {
        let _guard = self.lock.lock();
        self.wake.notify_all();
    }
}
