//! Cooperative cancellation for in-flight attempts.

use tokio::sync::watch;

/// Cloneable cancellation flag backed by a `watch` channel.
///
/// Long waits (challenge polling, protocol steps, automation) race against
/// [`CancelSignal::cancelled`] so a cancel tears the attempt down at the next
/// await point.
#[derive(Clone)]
pub struct CancelSignal {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow_and_update() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow_and_update() {
                return;
            }
        }
        // Sender gone without cancelling: never resolve.
        std::future::pending::<()>().await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
