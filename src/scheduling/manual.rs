//! Deterministic scheduler for tests.
//!
//! Tasks are recorded instead of timed. Tests inspect the requested delays and
//! fire tasks explicitly with [`ManualScheduler::run_next`].

use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::scheduler::{RenewalScheduler, ScheduledTask};

struct PendingTask {
    handle: ScheduledTask,
    future: BoxFuture<'static, ()>,
}

/// Records scheduled tasks and runs them on demand, in scheduling order.
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<PendingTask>>,
    next_id: AtomicU64,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays of tasks that are still pending and not cancelled.
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|task| !task.handle.is_cancelled())
            .map(|task| task.handle.delay())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_delays().len()
    }

    /// Total number of tasks ever scheduled.
    pub fn scheduled_total(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Run the oldest pending task. Cancelled tasks are discarded on the way.
    /// Returns `false` when nothing was left to run.
    pub async fn run_next(&self) -> bool {
        let next = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.retain(|task| !task.handle.is_cancelled());
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };

        match next {
            Some(task) => {
                task.future.await;
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler").field("pending", &self.pending_delays()).finish()
    }
}

impl RenewalScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> ScheduledTask {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = ScheduledTask::new(id, delay, CancellationToken::new());
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PendingTask { handle: handle.clone(), future: task });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_records_and_runs_in_order() {
        let scheduler = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in [1u64, 2] {
            let order = Arc::clone(&order);
            scheduler.schedule(
                Duration::from_secs(n),
                Box::pin(async move { order.lock().unwrap().push(n) }),
            );
        }

        assert_eq!(
            scheduler.pending_delays(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert!(scheduler.run_next().await);
        assert!(scheduler.run_next().await);
        assert!(!scheduler.run_next().await);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        assert_eq!(scheduler.scheduled_total(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_tasks_are_skipped() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        let task = scheduler.schedule(
            Duration::from_secs(1),
            Box::pin(async move {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        task.cancel();

        assert_eq!(scheduler.pending_count(), 0);
        assert!(!scheduler.run_next().await);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
