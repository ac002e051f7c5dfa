//! Process-wide tracking of extension-owned threads.
//!
//! Threads spawned through the host are attributed to the isolation
//! context that created them. On unload the reaper interrupts every
//! thread owned by the dying context, waits a bounded grace period for a
//! cooperative exit, and only then falls back to forced termination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::context::ContextId;

#[cfg(unix)]
type NativeId = libc::pthread_t;
#[cfg(not(unix))]
type NativeId = ();

/// Cooperative stop signal handed to every tracked thread.
///
/// Extension thread bodies are expected to poll [`StopToken::is_interrupted`]
/// and exit promptly once it returns true; `park_for` wakes early when the
/// thread is interrupted.
#[derive(Clone)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Park the current thread for up to `dur`, returning early on interrupt.
    pub fn park_for(&self, dur: Duration) {
        let deadline = Instant::now() + dur;
        while !self.is_interrupted() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::park_timeout(deadline - now);
        }
    }
}

struct TrackedThread {
    owner: ContextId,
    name: String,
    flag: Arc<AtomicBool>,
    done: Arc<(Mutex<bool>, Condvar)>,
    handle: std::thread::Thread,
    native: Arc<Mutex<Option<NativeId>>>,
}

impl TrackedThread {
    fn is_done(&self) -> bool {
        self.done.0.lock().map(|d| *d).unwrap_or(true)
    }
}

/// Outcome of stopping a context's threads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StopSummary {
    /// Threads that exited within the grace period
    pub stopped: usize,
    /// Threads that had to be forcibly terminated
    pub forced: usize,
}

/// Registry of live threads attributed to isolation contexts.
pub struct ThreadRegistry {
    threads: Mutex<Vec<TrackedThread>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a thread attributed to `owner`.
    ///
    /// The body receives a [`StopToken`] it must poll to exit cooperatively.
    pub fn spawn<F>(&self, owner: ContextId, name: &str, body: F) -> std::io::Result<()>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let flag = Arc::new(AtomicBool::new(false));
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let native: Arc<Mutex<Option<NativeId>>> = Arc::new(Mutex::new(None));

        let token = StopToken { flag: flag.clone() };
        let thread_done = done.clone();
        let thread_native = native.clone();

        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                #[cfg(unix)]
                if let Ok(mut slot) = thread_native.lock() {
                    // SAFETY: pthread_self on the current thread is always valid.
                    *slot = Some(unsafe { libc::pthread_self() });
                }
                #[cfg(not(unix))]
                let _ = thread_native;

                body(token);

                if let Ok(mut finished) = thread_done.0.lock() {
                    *finished = true;
                }
                thread_done.1.notify_all();
            })?;

        let record = TrackedThread {
            owner,
            name: name.to_string(),
            flag,
            done,
            handle: join.thread().clone(),
            native,
        };
        // The JoinHandle is dropped on purpose: tracked threads are joined
        // through the completion condvar, never through the handle.
        drop(join);

        if let Ok(mut threads) = self.threads.lock() {
            threads.retain(|t| !t.is_done());
            threads.push(record);
        }
        Ok(())
    }

    /// Names of threads owned by `owner` that have not yet exited.
    pub fn live_owned_by(&self, owner: ContextId) -> Vec<String> {
        self.threads
            .lock()
            .map(|threads| {
                threads
                    .iter()
                    .filter(|t| t.owner == owner && !t.is_done())
                    .map(|t| t.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of tracked threads that have not yet exited.
    pub fn live_count(&self) -> usize {
        self.threads
            .lock()
            .map(|threads| threads.iter().filter(|t| !t.is_done()).count())
            .unwrap_or(0)
    }

    /// Interrupt every thread owned by `owner`, wait up to `grace` for each
    /// to exit, then forcibly terminate stragglers.
    ///
    /// Forced termination is an accepted-risk last resort: it only runs
    /// after the grace period has elapsed, and only for threads whose owner
    /// context is being torn down.
    pub fn stop_owned_by(&self, owner: ContextId, grace: Duration) -> StopSummary {
        let owned: Vec<TrackedThread> = match self.threads.lock() {
            Ok(mut threads) => {
                let mut owned = Vec::new();
                let mut keep = Vec::new();
                for t in threads.drain(..) {
                    if t.owner == owner {
                        owned.push(t);
                    } else {
                        keep.push(t);
                    }
                }
                *threads = keep;
                owned
            }
            Err(_) => return StopSummary::default(),
        };

        let mut summary = StopSummary::default();
        for thread in owned {
            if thread.is_done() {
                summary.stopped += 1;
                continue;
            }

            thread.flag.store(true, Ordering::SeqCst);
            thread.handle.unpark();

            if wait_done(&thread.done, grace) {
                summary.stopped += 1;
                continue;
            }

            tracing::warn!(
                thread = %thread.name,
                context = %owner,
                "thread did not exit within grace period, terminating"
            );
            hard_stop(&thread);
            summary.forced += 1;
        }
        summary
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn wait_done(done: &(Mutex<bool>, Condvar), grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    let Ok(mut finished) = done.0.lock() else {
        return false;
    };
    while !*finished {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        match done.1.wait_timeout(finished, deadline - now) {
            Ok((guard, _)) => finished = guard,
            Err(_) => return false,
        }
    }
    true
}

#[cfg(unix)]
fn hard_stop(thread: &TrackedThread) {
    let native = thread.native.lock().ok().and_then(|slot| *slot);
    match native {
        // SAFETY: last-resort cancellation of a thread that ignored its
        // interrupt through the whole grace period. The thread belongs to a
        // context being destroyed, so no host state depends on it finishing.
        Some(id) => unsafe {
            libc::pthread_cancel(id);
        },
        None => {
            tracing::error!(thread = %thread.name, "no native handle, leaking thread");
        }
    }
}

#[cfg(not(unix))]
fn hard_stop(thread: &TrackedThread) {
    tracing::error!(
        thread = %thread.name,
        "forced termination unsupported on this platform, leaking thread"
    );
}
