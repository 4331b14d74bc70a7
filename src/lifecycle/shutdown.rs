//! Shutdown coordination for the gateway.

use tokio::sync::watch;

/// Coordinator for graceful shutdown.
///
/// The flag is latched: [`Shutdown::wait`] resolves for tasks that start
/// waiting after the trigger as well as before it.
#[derive(Clone, Debug)]
pub struct Shutdown {
    fired: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self { fired }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.fired.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.fired.borrow()
    }

    /// Resolve once shutdown has been triggered, even if that already happened.
    pub async fn wait(&self) {
        let mut rx = self.fired.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
