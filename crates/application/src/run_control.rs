use std::sync::Arc;

use bastion_core::{AppError, AppResult};
use tokio::sync::watch;

/// Cooperative cancellation shared by long-running operations.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationSignal {
    /// Creates a signal that has not fired.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Fires the signal for every clone.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns whether the signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Fails with `AppError::Cancelled` once the signal has fired.
    pub fn check(&self, operation: &str) -> AppResult<()> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled(format!("{operation} was cancelled")));
        }
        Ok(())
    }

    /// Resolves once the signal fires.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so waiting cannot fail.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}
