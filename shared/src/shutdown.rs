//! Process termination propagated as a signal instead of an exit call

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable handle that any component can use to request shutdown
///
/// Engines raise the signal when the operator quits or when the process can
/// no longer continue. The owning binary waits on it and exits; tests just
/// inspect it.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Requests shutdown; calling it more than once has no further effect
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once `trigger` has been called, immediately if it already was
    pub async fn triggered(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as self, so wait_for cannot fail here
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
