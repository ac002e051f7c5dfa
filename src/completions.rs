//! Tracking of in-flight asynchronous completions.
//!
//! Operations that wait on per-extension completion signals are tracked
//! process-wide so that unloading an extension can force-deliver its
//! outstanding signals, leaving no other extension deadlocked on one that
//! no longer exists. Membership is weak: an operation that finishes
//! normally is reclaimed with its last strong reference and never needs
//! explicit removal.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

/// An in-flight asynchronous operation awaiting per-extension signals.
///
/// What "completing" means is up to the operation; the tracker only
/// promises to deliver the signal for a dying extension exactly once per
/// force pass.
pub trait PendingCompletion: Send + Sync {
    /// Deliver `extension`'s completion signal. Must tolerate being called
    /// for extensions that never registered interest.
    fn complete_for(&self, extension: &str);
}

/// Process-wide, weakly-referenced set of outstanding operations.
pub struct CompletionTracker {
    pending: Mutex<Vec<Weak<dyn PendingCompletion>>>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Track an operation. Safe to call concurrently; dead entries are
    /// pruned opportunistically.
    pub fn track(&self, op: &Arc<dyn PendingCompletion>) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|w| w.strong_count() > 0);
            pending.push(Arc::downgrade(op));
        }
    }

    /// Deliver `extension`'s completion signal to every tracked operation.
    ///
    /// Iterates a snapshot so the tracking lock is not held across
    /// third-party callbacks; a panicking operation is logged and skipped
    /// so it cannot block completion of the rest. Returns how many
    /// operations were signaled.
    pub fn force_complete(&self, extension: &str) -> usize {
        let snapshot: Vec<Arc<dyn PendingCompletion>> = match self.pending.lock() {
            Ok(mut pending) => {
                pending.retain(|w| w.strong_count() > 0);
                pending.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => return 0,
        };

        let mut signaled = 0;
        for op in snapshot {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                op.complete_for(extension)
            }));
            match result {
                Ok(()) => signaled += 1,
                Err(_) => {
                    tracing::warn!(extension, "pending completion panicked during force-complete");
                }
            }
        }
        signaled
    }

    /// Number of operations still tracked (live weak references).
    pub fn tracked(&self) -> usize {
        self.pending
            .lock()
            .map(|p| p.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A completion that waits for a set of extensions to each signal once.
///
/// The canonical [`PendingCompletion`] implementation: the host posts an
/// operation, interested extensions register intents, and the operation
/// finishes once every intent has been completed (normally or by force).
pub struct CompletionLatch {
    intents: Mutex<HashSet<String>>,
    complete: Condvar,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self {
            intents: Mutex::new(HashSet::new()),
            complete: Condvar::new(),
        }
    }

    /// Register `extension`'s intent; the latch will not complete until
    /// that extension signals.
    pub fn register_intent(&self, extension: &str) {
        if let Ok(mut intents) = self.intents.lock() {
            intents.insert(extension.to_ascii_lowercase());
        }
    }

    pub fn is_complete(&self) -> bool {
        self.intents.lock().map(|i| i.is_empty()).unwrap_or(true)
    }

    /// Block until every registered intent has been completed, or the
    /// timeout elapses. Returns whether the latch completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut intents) = self.intents.lock() else {
            return false;
        };
        while !intents.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.complete.wait_timeout(intents, deadline - now) {
                Ok((guard, _)) => intents = guard,
                Err(_) => return false,
            }
        }
        true
    }
}

impl Default for CompletionLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCompletion for CompletionLatch {
    fn complete_for(&self, extension: &str) {
        if let Ok(mut intents) = self.intents.lock() {
            intents.remove(&extension.to_ascii_lowercase());
            if intents.is_empty() {
                self.complete.notify_all();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_completes_when_all_intents_signal() {
        let latch = CompletionLatch::new();
        latch.register_intent("Foo");
        latch.register_intent("Bar");
        assert!(!latch.is_complete());

        latch.complete_for("foo");
        assert!(!latch.is_complete());
        latch.complete_for("BAR");
        assert!(latch.is_complete());
        assert!(latch.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_force_complete_signals_tracked_operations() {
        let tracker = CompletionTracker::new();
        let latch = Arc::new(CompletionLatch::new());
        latch.register_intent("Foo");

        let op: Arc<dyn PendingCompletion> = latch.clone();
        tracker.track(&op);
        assert_eq!(tracker.tracked(), 1);

        assert_eq!(tracker.force_complete("Foo"), 1);
        assert!(latch.is_complete());
    }

    #[test]
    fn test_finished_operations_are_reclaimed_without_removal() {
        let tracker = CompletionTracker::new();
        {
            let latch = Arc::new(CompletionLatch::new());
            let op: Arc<dyn PendingCompletion> = latch;
            tracker.track(&op);
            assert_eq!(tracker.tracked(), 1);
        }
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_panicking_operation_does_not_block_the_rest() {
        struct Exploding;
        impl PendingCompletion for Exploding {
            fn complete_for(&self, _extension: &str) {
                panic!("bad operation");
            }
        }

        let tracker = CompletionTracker::new();
        let bad: Arc<dyn PendingCompletion> = Arc::new(Exploding);
        let latch = Arc::new(CompletionLatch::new());
        latch.register_intent("Foo");
        let good: Arc<dyn PendingCompletion> = latch.clone();

        tracker.track(&bad);
        tracker.track(&good);

        assert_eq!(tracker.force_complete("Foo"), 1);
        assert!(latch.is_complete());
    }

    #[test]
    fn test_concurrent_force_complete_never_drops_third_party_operations() {
        let tracker = Arc::new(CompletionTracker::new());

        let third = Arc::new(CompletionLatch::new());
        third.register_intent("Carol");
        let third_op: Arc<dyn PendingCompletion> = third.clone();
        tracker.track(&third_op);

        let mut handles = Vec::new();
        for name in ["Alice", "Bob"] {
            let tracker = tracker.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    tracker.force_complete(name);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Carol's operation is still tracked and still incomplete.
        assert_eq!(tracker.tracked(), 1);
        assert!(!third.is_complete());
        tracker.force_complete("Carol");
        assert!(third.is_complete());
    }
}
