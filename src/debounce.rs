//! Single-slot delayed task: at most one pending timer per debouncer.
//! Used for the batch drain (restart on every arm) and the stats save
//! (coalesce into the pending timer).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmPolicy {
    /// Re-arming cancels the pending timer and starts a fresh delay.
    Restart,
    /// Re-arming while a timer is pending is a no-op; the pending action runs.
    Coalesce,
}

struct Slot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Pending-task handle re-armed on each call.
///
/// Once the delay elapses the timer releases the slot before running its
/// action, so the action always runs to completion and a new timer may be
/// armed while it is still executing.
pub struct Debouncer {
    name: &'static str,
    delay: Duration,
    policy: ArmPolicy,
    slot: Arc<Mutex<Slot>>,
}

impl Debouncer {
    pub fn new(name: &'static str, delay: Duration, policy: ArmPolicy) -> Self {
        Self {
            name,
            delay,
            policy,
            slot: Arc::new(Mutex::new(Slot {
                generation: 0,
                handle: None,
            })),
        }
    }

    /// Schedule `action` after the delay. Returns false if coalesced into an
    /// already pending timer. Must be called inside a Tokio runtime.
    pub fn arm<F, Fut>(&self, action: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if let Some(handle) = slot.handle.take() {
            match self.policy {
                ArmPolicy::Coalesce => {
                    slot.handle = Some(handle);
                    return false;
                }
                ArmPolicy::Restart => {
                    handle.abort();
                    trace!(debouncer = self.name, "debounce_restarted");
                }
            }
        }

        slot.generation += 1;
        let generation = slot.generation;
        let shared = Arc::clone(&self.slot);
        let delay = self.delay;
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = shared.lock();
                if slot.generation != generation {
                    return;
                }
                slot.handle = None;
            }
            action().await;
        }));
        true
    }

    /// Drop the pending timer, if any. Returns true if one was cancelled.
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot.lock();
        slot.generation += 1;
        match slot.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().handle.is_some()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
