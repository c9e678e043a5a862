//! Shutdown coordination.

use std::time::Duration;

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Every long-running task subscribes; one trigger stops them all. Listeners
/// stop accepting at once and get `grace` to drain in-flight requests.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    grace: Duration,
}

impl Shutdown {
    pub fn new(grace: Duration) -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx, grace }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        tracing::info!(grace = ?self.grace, "Shutdown triggered");
        let _ = self.tx.send(());
    }

    /// Drain deadline for in-flight requests.
    pub fn grace(&self) -> Duration {
        self.grace
    }
}
