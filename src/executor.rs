//! Per-extension internal task executors.

use std::future::Future;
use std::sync::Mutex;

use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

/// A small dedicated runtime owned by one extension instance.
///
/// Unload shuts it down immediately with no graceful drain: queued and
/// running tasks are abandoned, matching the rest of the teardown
/// sequence's maximally-destructive posture.
pub struct TaskExecutor {
    extension: String,
    runtime: Mutex<Option<Runtime>>,
}

impl TaskExecutor {
    /// Build the executor with `threads` worker threads, named after the
    /// owning extension.
    pub fn new(extension: &str, threads: usize) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name(format!("ext-{}", extension.to_ascii_lowercase()))
            .enable_time()
            .build()?;

        Ok(Self {
            extension: extension.to_string(),
            runtime: Mutex::new(Some(runtime)),
        })
    }

    /// Spawn a task, or return `None` if the executor is already shut down.
    pub fn spawn<F>(&self, future: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match self.runtime.lock() {
            Ok(guard) => guard.as_ref().map(|rt| rt.spawn(future)),
            Err(_) => None,
        }
    }

    /// Shut down immediately without draining queued work. Idempotent.
    pub fn shutdown_now(&self) {
        let runtime = match self.runtime.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(runtime) = runtime {
            tracing::debug!(extension = %self.extension, "shutting down task executor");
            runtime.shutdown_background();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.runtime.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_spawns_tasks_until_shutdown() {
        let executor = TaskExecutor::new("Foo", 1).unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        let handle = executor
            .spawn(async move {
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();

        // Wait for the task on a throwaway runtime.
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(handle)
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));

        executor.shutdown_now();
        assert!(executor.is_shutdown());
        assert!(executor.spawn(async {}).is_none());
    }

    #[test]
    fn test_shutdown_abandons_queued_work() {
        let executor = TaskExecutor::new("Foo", 1).unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        executor.spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            flag.store(true, Ordering::SeqCst);
        });

        executor.shutdown_now();
        executor.shutdown_now(); // idempotent
        assert!(!ran.load(Ordering::SeqCst));
    }
}
