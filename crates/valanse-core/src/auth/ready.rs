//! Session readiness signal.
//!
//! Activation flips the signal once exchange and refresh have both settled.
//! Requests holding a [`ReadyGate`] wait for it before the augmenter reads
//! the store, so a request issued during activation cannot race ahead of a
//! pending credential.

use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

/// Sending half, owned by the session manager.
#[derive(Debug)]
pub struct SessionReady {
    tx: watch::Sender<bool>,
}

impl SessionReady {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn mark_ready(&self) {
        self.tx.send_replace(true);
    }

    /// Hold requests again, e.g. while a new activation runs
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn gate(&self, timeout: Duration) -> ReadyGate {
        ReadyGate {
            rx: self.tx.subscribe(),
            timeout,
        }
    }
}

impl Default for SessionReady {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half handed to the request client.
#[derive(Debug, Clone)]
pub struct ReadyGate {
    rx: watch::Receiver<bool>,
    timeout: Duration,
}

impl ReadyGate {
    /// Wait until the session is ready.
    ///
    /// Returns false when the wait timed out or the session manager is gone;
    /// the caller then proceeds with whatever the store holds.
    pub async fn wait(&self) -> bool {
        let mut rx = self.rx.clone();
        // The watch::Ref borrows rx; release it before matching.
        let waited = tokio::time::timeout(self.timeout, rx.wait_for(|ready| *ready))
            .await
            .map(|seen| seen.map(|_| ()));
        match waited {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                warn!("Session manager dropped before activation settled");
                false
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Timed out waiting for session activation"
                );
                false
            }
        }
    }
}
