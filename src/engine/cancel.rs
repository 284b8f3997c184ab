//! One-shot cancellation fan-out.
//!
//! A single token is cloned into every worker. `cancel()` broadcasts once;
//! workers either poll [`CancelToken::is_cancelled`] between steps or await
//! [`CancelToken::cancelled`] inside `select!` around blocking I/O.

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Broadcasts cancellation to every clone. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // wait_for returns immediately when already cancelled.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
