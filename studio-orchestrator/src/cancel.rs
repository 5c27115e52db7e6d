use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cooperative stop flag shared by every reconciliation of one operation.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once the flag flips.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` on cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_cancelled(),
            _ = self.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_when_not_cancelled() {
        let signal = CancelSignal::new();
        assert!(signal.sleep(Duration::from_secs(3)).await);
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let signal = CancelSignal::new();
        let sleeper = signal.clone();
        let start = tokio::time::Instant::now();

        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        signal.cancel();

        assert!(!handle.await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let signal = CancelSignal::new();
        signal.cancel();
        assert!(signal.is_cancelled());
        assert!(!signal.sleep(Duration::from_secs(3600)).await);
    }
}
