//! Teardown of everything an extension instance owns.
//!
//! Every step is independently best-effort: a failure is logged with the
//! extension's name and cause and never aborts the steps after it. The
//! sequence is maximally destructive rather than maximally correct: a
//! half-broken extension must not be able to keep its resources alive.

use std::sync::Arc;
use std::time::Duration;

use crate::completions::CompletionTracker;
use crate::extension::run_hook;
use crate::instance::ExtensionInstance;
use crate::registry::{CommandRegistry, ListenerRegistry};
use crate::scheduler::Scheduler;
use crate::threads::ThreadRegistry;

/// Reclaim all resources owned by `instance`, in fixed order.
///
/// Does not touch the extension registry itself; the caller removes the
/// entry afterwards.
#[allow(clippy::too_many_arguments)]
pub(crate) fn reap(
    instance: &Arc<ExtensionInstance>,
    commands: &CommandRegistry,
    listeners: &ListenerRegistry,
    scheduler: &Scheduler,
    threads: &ThreadRegistry,
    completions: &CompletionTracker,
    grace: Duration,
) {
    let name = instance.name().to_string();
    let ctx = instance.context_id();

    // 1. Disable hook, then close the extension's logger.
    match instance.extension().lock() {
        Ok(mut extension) => {
            if let Err(cause) = run_hook(|| extension.on_disable()) {
                tracing::error!(extension = %name, %cause, "disable hook failed");
            }
        }
        Err(_) => {
            tracing::error!(extension = %name, "extension lock poisoned, skipping disable hook");
        }
    }
    instance.logger().close();

    // 2. Registration records.
    let removed = commands.remove_owned_by(ctx);
    if removed > 0 {
        tracing::debug!(extension = %name, removed, "unregistered commands");
    }
    let removed = listeners.remove_owned_by(ctx);
    if removed > 0 {
        tracing::debug!(extension = %name, removed, "unregistered listeners");
    }

    // 3. Scheduled work.
    let cancelled = scheduler.cancel_owned_by(ctx);
    if cancelled > 0 {
        tracing::debug!(extension = %name, cancelled, "cancelled scheduled tasks");
    }

    // 4. Internal task executor, no drain.
    instance.executor().shutdown_now();

    // 5. Threads attributed to the context.
    let summary = threads.stop_owned_by(ctx, grace);
    if summary.forced > 0 {
        tracing::error!(
            extension = %name,
            forced = summary.forced,
            "threads required forced termination"
        );
    }

    // 6. Pending completions waiting on this extension.
    let signaled = completions.force_complete(&name);
    if signaled > 0 {
        tracing::debug!(extension = %name, signaled, "force-completed pending operations");
    }

    // 7. Repair sweep for records inserted outside the normal path.
    let swept = commands.sweep_origin(ctx);
    if swept > 0 {
        tracing::warn!(extension = %name, swept, "swept out-of-band command entries");
    }

    // 8. Release the isolation context.
    match instance.context().lock() {
        Ok(mut context) => context.release(),
        Err(_) => {
            tracing::error!(extension = %name, "context lock poisoned, leaking isolation context");
        }
    }
}
