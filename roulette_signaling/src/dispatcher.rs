//! Bounded task pool for outbound work
//!
//! Everything that may block on the network runs here instead of on the
//! connection's read loop. Shutdown stops admission, waits out a drain
//! window, then cancels whatever is still running.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Default upper bound on in-flight tasks.
pub const DEFAULT_MAX_PENDING_TASKS: usize = 65_536;

/// Default drain window on shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How a shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every task finished inside the drain window
    Drained,
    /// The window elapsed and this many tasks were cancelled
    Cancelled(usize),
}

/// Shared worker pool on the tokio runtime
pub struct Dispatcher {
    tracker: TaskTracker,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
    shutting_down: AtomicBool,
    drain_timeout: Duration,
}

impl Dispatcher {
    /// Create a pool admitting at most `max_pending` concurrent tasks.
    pub fn new(max_pending: usize, drain_timeout: Duration) -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            permits: Arc::new(Semaphore::new(max_pending.max(1))),
            shutting_down: AtomicBool::new(false),
            drain_timeout,
        }
    }

    /// Submit a task. Returns false, after logging, if the pool is shutting
    /// down or saturated; the task is dropped in that case.
    pub fn spawn<F>(&self, label: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutting_down() {
            debug!(task = label, "dispatcher shutting down, task rejected");
            return false;
        }
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            warn!(task = label, "dispatcher saturated, task rejected");
            return false;
        };

        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            tokio::select! {
                () = cancel.cancelled() => debug!(task = label, "task cancelled"),
                () = task => {}
            }
        });
        true
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Tasks spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop admitting tasks and drain. Safe to call more than once.
    pub async fn shutdown(&self) -> DrainOutcome {
        self.shutting_down.store(true, Ordering::Release);
        self.tracker.close();

        let pending = self.tracker.len();
        info!(pending, timeout = ?self.drain_timeout, "draining dispatcher");

        if tokio::time::timeout(self.drain_timeout, self.tracker.wait())
            .await
            .is_ok()
        {
            info!("dispatcher drained");
            return DrainOutcome::Drained;
        }

        let remaining = self.tracker.len();
        warn!(remaining, "drain window elapsed, cancelling remaining tasks");
        self.cancel.cancel();
        self.tracker.wait().await;
        DrainOutcome::Cancelled(remaining)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_TASKS, DEFAULT_DRAIN_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn runs_submitted_tasks() {
        let dispatcher = Dispatcher::default();
        let (tx, rx) = oneshot::channel();
        assert!(dispatcher.spawn("test", async move {
            let _ = tx.send(7);
        }));
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn rejects_when_saturated() {
        let dispatcher = Dispatcher::new(1, Duration::from_secs(1));
        let (release, wait) = oneshot::channel::<()>();
        assert!(dispatcher.spawn("blocker", async move {
            let _ = wait.await;
        }));
        assert!(!dispatcher.spawn("overflow", async {}));

        let _ = release.send(());
        assert_eq!(dispatcher.shutdown().await, DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn rejects_after_shutdown() {
        let dispatcher = Dispatcher::default();
        assert_eq!(dispatcher.shutdown().await, DrainOutcome::Drained);
        assert!(dispatcher.is_shutting_down());
        assert!(!dispatcher.spawn("late", async {}));
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_tasks() {
        let dispatcher = Dispatcher::new(16, Duration::from_secs(5));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let done = Arc::clone(&done);
            dispatcher.spawn("sleepy", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(dispatcher.shutdown().await, DrainOutcome::Drained);
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_after_drain_window() {
        let dispatcher = Dispatcher::new(16, Duration::from_secs(5));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        dispatcher.spawn("stuck", async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert_eq!(dispatcher.shutdown().await, DrainOutcome::Cancelled(1));
        assert!(!finished.load(Ordering::SeqCst));
    }
}
