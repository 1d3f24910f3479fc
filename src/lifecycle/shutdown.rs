//! Shutdown coordination.

use std::sync::Arc;

use tokio::sync::watch;

/// Coordinator for graceful shutdown.
///
/// Triggering is sticky: waiters that arrive after the trigger still
/// observe it through [`Shutdown::is_triggered`] and [`Shutdown::wait`].
#[derive(Clone)]
pub struct Shutdown {
    triggered: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (triggered, _) = watch::channel(false);
        Self {
            triggered: Arc::new(triggered),
        }
    }

    /// Trigger the shutdown signal. Later calls are no-ops.
    pub fn trigger(&self) {
        if self.triggered.send_replace(true) {
            return;
        }
        tracing::info!(waiters = self.triggered.receiver_count(), "shutdown triggered");
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.borrow()
    }

    /// Resolves once [`Shutdown::trigger`] has been called.
    pub async fn wait(&self) {
        let mut rx = self.triggered.subscribe();
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
