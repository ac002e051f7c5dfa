//! Host-wide scheduling of extension-owned work.
//!
//! Every scheduled task records the isolation context that owns it so the
//! whole set can be cancelled when that context is torn down.

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::context::ContextId;

struct ScheduledTask {
    owner: ContextId,
    handle: JoinHandle<()>,
}

/// Shared scheduler for delayed and recurring extension work.
pub struct Scheduler {
    runtime: tokio::runtime::Runtime,
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl Scheduler {
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ext-scheduler")
            .enable_time()
            .build()?;

        Ok(Self {
            runtime,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Run `task` once after `delay`.
    pub fn schedule_once<F>(&self, owner: ContextId, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        self.push(owner, handle);
    }

    /// Run `task` every `period`, starting one period from now.
    pub fn schedule_repeating<F>(&self, owner: ContextId, period: Duration, mut task: F)
    where
        F: FnMut() + Send + 'static,
    {
        let handle = self.runtime.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticks = tokio::time::interval_at(start, period);
            loop {
                ticks.tick().await;
                task();
            }
        });
        self.push(owner, handle);
    }

    /// Cancel every task owned by `owner`. Returns how many were cancelled.
    pub fn cancel_owned_by(&self, owner: ContextId) -> usize {
        let Ok(mut tasks) = self.tasks.lock() else {
            return 0;
        };
        let mut cancelled = 0;
        tasks.retain(|t| {
            if t.owner == owner {
                t.handle.abort();
                cancelled += 1;
                false
            } else {
                !t.handle.is_finished()
            }
        });
        cancelled
    }

    /// Number of not-yet-finished tasks owned by `owner`.
    pub fn owned_count(&self, owner: ContextId) -> usize {
        self.tasks
            .lock()
            .map(|tasks| {
                tasks
                    .iter()
                    .filter(|t| t.owner == owner && !t.handle.is_finished())
                    .count()
            })
            .unwrap_or(0)
    }

    fn push(&self, owner: ContextId, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.handle.is_finished());
            tasks.push(ScheduledTask { owner, handle });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_repeating_task_fires_until_cancelled() {
        let scheduler = Scheduler::new().unwrap();
        let owner = ContextId::next();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler.schedule_repeating(owner, Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        while fired.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(fired.load(Ordering::SeqCst) >= 3);

        assert_eq!(scheduler.cancel_owned_by(owner), 1);
        let after_cancel = fired.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        // Allow at most one in-flight tick racing the abort.
        assert!(fired.load(Ordering::SeqCst) <= after_cancel + 1);
    }

    #[test]
    fn test_cancel_is_scoped_to_the_owner() {
        let scheduler = Scheduler::new().unwrap();
        let mine = ContextId::next();
        let other = ContextId::next();

        scheduler.schedule_once(mine, Duration::from_secs(60), || {});
        scheduler.schedule_once(other, Duration::from_secs(60), || {});
        assert_eq!(scheduler.owned_count(mine), 1);
        assert_eq!(scheduler.owned_count(other), 1);

        assert_eq!(scheduler.cancel_owned_by(mine), 1);
        assert_eq!(scheduler.owned_count(mine), 0);
        assert_eq!(scheduler.owned_count(other), 1);

        scheduler.cancel_owned_by(other);
    }
}
