//! Live WebSocket session tracking for shutdown

use std::sync::Arc;

use tokio::sync::watch;

/// Counts sessions that are still running. Upgraded connections outlive
/// the HTTP server's graceful shutdown, so shutdown waits on this instead.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    active: Arc<watch::Sender<usize>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        let (active, _rx) = watch::channel(0);
        Self {
            active: Arc::new(active),
        }
    }

    /// Register a session; it counts as active until the guard is dropped
    pub fn track(&self) -> SessionGuard {
        self.active.send_modify(|n| *n += 1);
        SessionGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    /// Resolves once no session is active
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by a running session
#[derive(Debug)]
pub struct SessionGuard {
    active: Arc<watch::Sender<usize>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}
