//! Turn an operator interrupt into a single stop request.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

/// Something that can be asked to stop.
#[cfg_attr(test, automock)]
pub trait Stoppable: Send + Sync {
    fn stop(&self);
}

/// Registration of an interrupt listener.
///
/// The listener calls [`Stoppable::stop`] once when `interrupt` resolves.
/// Dropping the guard unregisters it, whether or not the interrupt fired.
#[must_use = "dropping the guard unregisters the interrupt listener"]
pub struct InterruptGuard {
    handle: JoinHandle<()>,
}

impl InterruptGuard {
    pub fn register<F, S>(interrupt: F, target: S) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
        S: Stoppable + 'static,
    {
        let handle = tokio::spawn(async move {
            interrupt.await;
            info!("Interrupt received, stopping port-forward");
            target.stop();
        });
        Self { handle }
    }

    /// Whether the interrupt has fired and the stop was delivered.
    #[cfg(test)]
    fn has_fired(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for interrupt signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};

    /// Mock that reports each stop call on a channel.
    fn reporting_target() -> (MockStoppable, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut mock = MockStoppable::new();
        mock.expect_stop().returning(move || {
            let _ = tx.send(());
        });
        (mock, rx)
    }

    #[tokio::test]
    async fn interrupt_issues_exactly_one_stop() {
        let (target, mut stops) = reporting_target();
        let (fire, interrupt) = oneshot::channel::<()>();

        let guard = InterruptGuard::register(
            async move {
                let _ = interrupt.await;
            },
            target,
        );
        assert!(!guard.has_fired());

        fire.send(()).expect("listener is registered");
        stops.recv().await.expect("stop delivered");

        // The listener task ends after one stop, dropping the target
        assert!(stops.recv().await.is_none());
        assert!(guard.has_fired());
    }

    #[tokio::test]
    async fn dropping_guard_unregisters_listener() {
        let (target, mut stops) = reporting_target();
        let (mut fire, interrupt) = oneshot::channel::<()>();

        let guard = InterruptGuard::register(
            async move {
                let _ = interrupt.await;
            },
            target,
        );
        drop(guard);

        // The aborted listener drops its end of the interrupt channel
        tokio::time::timeout(Duration::from_secs(1), fire.closed())
            .await
            .expect("listener aborted");
        assert!(stops.recv().await.is_none(), "stop must not be issued");
    }

    #[tokio::test]
    async fn pending_interrupt_never_stops() {
        let (target, mut stops) = reporting_target();
        let guard = InterruptGuard::register(std::future::pending(), target);

        let waited = tokio::time::timeout(Duration::from_millis(50), stops.recv()).await;
        assert!(waited.is_err());
        assert!(!guard.has_fired());
    }
}
