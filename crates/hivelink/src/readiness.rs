//! Connection readiness signal.
//!
//! A boolean event with one writer (the connection lifecycle) and any number
//! of readers. Readers either poll it or suspend until it is raised, with or
//! without a deadline. Works the same on a multi-thread runtime and on a
//! single-threaded cooperative one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shared readiness flag. Clones observe and drive the same flag.
#[derive(Clone, Debug)]
pub struct ReadinessSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadinessSignal {
    /// A new, lowered signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the signal, waking every waiter.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Lower the signal.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Suspend until the signal is raised. Returns at once if already set.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Wait for the signal for at most `timeout`. Returns whether it was raised.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for ReadinessSignal {
    fn default() -> Self {
        Self::new()
    }
}
