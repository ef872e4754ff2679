//! Cooperative shutdown signal
//!
//! A clonable token backed by a watch channel. The engine trips it on
//! SIGTERM/SIGINT; long-lived tasks select on `cancelled()` inside their
//! read/write loops and sleeps.

use tokio::sync::watch;

/// Sender half; owned by the engine.
#[derive(Debug)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

/// Receiver half; cheap to clone into every task.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken { rx: self.tx.subscribe() }
    }

    /// Broadcast shutdown to every token.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownToken {
    /// A token that never fires (tests, detached tools).
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive forever so the channel never closes.
        std::mem::forget(tx);
        Self { rx }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when shutdown is broadcast (or the controller is dropped).
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn broadcast_reaches_all_tokens() {
        let controller = ShutdownController::new();
        let mut a = controller.token();
        let mut b = controller.token();
        assert!(!a.is_shutdown());

        controller.shutdown();
        tokio::time::timeout(Duration::from_secs(1), a.cancelled()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), b.cancelled()).await.unwrap();
        assert!(b.is_shutdown());
    }

    #[tokio::test]
    async fn never_token_stays_pending() {
        let mut token = ShutdownToken::never();
        let result =
            tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(result.is_err());
    }
}
