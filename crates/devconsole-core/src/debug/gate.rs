use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use super::DebugError;
use crate::sync::lock;

/// How a waiting debug session is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Let exactly one waiter continue.
    Released,
    /// Fail the current and every later wait until `reset`.
    Cancelled,
}

#[derive(Debug, Default)]
struct GateState {
    pending_release: bool,
    cancelled: bool,
}

/// Level-triggered resume gate.
///
/// A `Released` signal sent while nobody waits is kept and consumed by the
/// next `wait`. `Cancelled` is sticky.
#[derive(Debug, Default)]
pub struct ResumeGate {
    state: Mutex<GateState>,
    notify: Notify,
}

impl ResumeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn wait(&self) -> Result<(), DebugError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.cancelled {
                    return Err(DebugError::Terminated);
                }
                if state.pending_release {
                    state.pending_release = false;
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    pub fn signal(&self, outcome: GateOutcome) {
        {
            let mut state = self.lock();
            match outcome {
                GateOutcome::Released => state.pending_release = true,
                GateOutcome::Cancelled => state.cancelled = true,
            }
        }
        self.notify.notify_waiters();
    }

    /// Clear both a pending release and a cancellation.
    pub fn reset(&self) {
        *self.lock() = GateState::default();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        lock(&self.state)
    }
}
