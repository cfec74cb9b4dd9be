use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A one-shot task that runs after a delay and is aborted when dropped.
///
/// Stored inside the peer state that owns it, so tearing down a peer cancels
/// any work still scheduled against it.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn `fut` to run after `delay` on the current tokio runtime.
    pub fn after<F>(delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        });
        Self { handle }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
