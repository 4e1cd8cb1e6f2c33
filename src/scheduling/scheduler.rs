//! Delayed one-shot task scheduling.
//!
//! Engines never sleep on their own. They hand a future and a delay to a
//! [`RenewalScheduler`] and keep the returned [`ScheduledTask`] so the task can
//! be cancelled when it is superseded or the engine shuts down.

use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::errors::{LifecycleError, Result};

/// Handle to a scheduled task.
///
/// Cancellation only takes effect while the task is still waiting for its
/// delay to elapse. A task that already started runs to completion.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    id: u64,
    delay: Duration,
    token: CancellationToken,
}

impl ScheduledTask {
    pub fn new(id: u64, delay: Duration, token: CancellationToken) -> Self {
        Self { id, delay, token }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Delay the task was scheduled with.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Runs tasks once after a delay.
pub trait RenewalScheduler: Send + Sync + fmt::Debug {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> ScheduledTask;
}

/// Scheduler backed by a tokio runtime.
///
/// Every task is a spawned timer guarded by a child of the scheduler's root
/// cancellation token, so [`TokioScheduler::shutdown`] cancels everything still
/// pending.
pub struct TokioScheduler {
    handle: Handle,
    root: CancellationToken,
    next_id: AtomicU64,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle, root: CancellationToken::new(), next_id: AtomicU64::new(1) }
    }

    /// Scheduler on the runtime the caller is running in.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            LifecycleError::config(format!("No tokio runtime available for scheduler: {}", e))
        })?;
        Ok(Self::new(handle))
    }

    /// Cancel all pending tasks. Tasks scheduled afterwards are cancelled immediately.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("shutdown", &self.root.is_cancelled())
            .field("scheduled", &(self.next_id.load(Ordering::Relaxed) - 1))
            .finish()
    }
}

impl RenewalScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> ScheduledTask {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let guard = token.clone();

        self.handle.spawn(async move {
            tokio::select! {
                biased;
                _ = guard.cancelled() => {
                    trace!(task_id = id, "Scheduled task cancelled before execution");
                }
                _ = tokio::time::sleep(delay) => {
                    trace!(task_id = id, "Running scheduled task");
                    task.await;
                }
            }
        });

        ScheduledTask::new(id, delay, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting_task(counter: &Arc<AtomicUsize>) -> BoxFuture<'static, ()> {
        let counter = Arc::clone(counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_after_delay() {
        let scheduler = TokioScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let task = scheduler.schedule(Duration::from_secs(25), counting_task(&counter));
        assert_eq!(task.delay(), Duration::from_secs(25));

        tokio::time::sleep(Duration::from_secs(24)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_never_runs() {
        let scheduler = TokioScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let task = scheduler.schedule(Duration::from_secs(5), counting_task(&counter));
        task.cancel();
        assert!(task.is_cancelled());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_tasks() {
        let scheduler = TokioScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let first = scheduler.schedule(Duration::from_secs(5), counting_task(&counter));
        let second = scheduler.schedule(Duration::from_secs(50), counting_task(&counter));
        scheduler.shutdown();

        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert!(scheduler.is_shutdown());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_tasks_do_not_delay_each_other() {
        let scheduler = TokioScheduler::current().unwrap();
        let short = Arc::new(AtomicUsize::new(0));
        let long = Arc::new(AtomicUsize::new(0));

        let slow_counter = Arc::clone(&short);
        scheduler.schedule(
            Duration::from_secs(5),
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(1000)).await;
                slow_counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        scheduler.schedule(Duration::from_secs(95), counting_task(&long));

        tokio::time::sleep(Duration::from_secs(96)).await;
        assert_eq!(long.load(Ordering::SeqCst), 1);
        assert_eq!(short.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_current_without_runtime_fails() {
        assert!(matches!(TokioScheduler::current(), Err(LifecycleError::Config { .. })));
    }
}
