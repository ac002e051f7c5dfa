//! The extension contract and the host facilities bound into it.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::completions::{CompletionTracker, PendingCompletion};
use crate::context::ContextId;
use crate::executor::TaskExecutor;
use crate::registry::{CommandRegistry, ListenerRegistry};
use crate::scheduler::Scheduler;
use crate::threads::{StopToken, ThreadRegistry};

/// Result of a lifecycle hook.
pub type HookResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// The contract every extension implements.
///
/// `bind` is the privileged initializer: it runs exactly once, before any
/// other hook, and hands the extension its handles into host facilities.
/// The remaining hooks follow the lifecycle: `on_load`, `on_enable`,
/// and eventually `on_disable` during unload.
pub trait Extension: Send {
    /// Bind host facilities. Runs before `on_load`.
    fn bind(&mut self, services: ExtensionServices) {
        let _ = services;
    }

    fn on_load(&mut self) -> HookResult {
        Ok(())
    }

    fn on_enable(&mut self) -> HookResult {
        Ok(())
    }

    fn on_disable(&mut self) -> HookResult {
        Ok(())
    }
}

/// Constructor for an extension entry point.
pub type ExtensionCtor = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Entry points linked into the host binary itself.
///
/// Consulted before the archive's dynamic library when resolving a
/// manifest's `main` symbol, so statically linked extensions load through
/// the same lifecycle as dynamic ones.
pub struct BuiltinEntryPoints {
    ctors: RwLock<HashMap<String, ExtensionCtor>>,
}

impl BuiltinEntryPoints {
    pub fn new() -> Self {
        Self {
            ctors: RwLock::new(HashMap::new()),
        }
    }

    pub fn register<F>(&self, symbol: &str, ctor: F)
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        if let Ok(mut ctors) = self.ctors.write() {
            ctors.insert(symbol.to_string(), Arc::new(ctor));
        }
    }

    pub fn resolve(&self, symbol: &str) -> Option<ExtensionCtor> {
        self.ctors.read().ok()?.get(symbol).cloned()
    }
}

impl Default for BuiltinEntryPoints {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-extension logger routed through `tracing`.
///
/// Closed during unload; messages written after that are dropped.
pub struct ExtensionLogger {
    extension: String,
    closed: AtomicBool,
}

impl ExtensionLogger {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.to_string(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn debug(&self, message: &str) {
        if !self.is_closed() {
            tracing::debug!(extension = %self.extension, "{message}");
        }
    }

    pub fn info(&self, message: &str) {
        if !self.is_closed() {
            tracing::info!(extension = %self.extension, "{message}");
        }
    }

    pub fn warn(&self, message: &str) {
        if !self.is_closed() {
            tracing::warn!(extension = %self.extension, "{message}");
        }
    }

    pub fn error(&self, message: &str) {
        if !self.is_closed() {
            tracing::error!(extension = %self.extension, "{message}");
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Handles into host facilities, bound into an extension on load.
///
/// Everything created through these handles is attributed to the owning
/// isolation context and reclaimed when that context is torn down.
#[derive(Clone)]
pub struct ExtensionServices {
    name: String,
    context: ContextId,
    logger: Arc<ExtensionLogger>,
    executor: Arc<TaskExecutor>,
    commands: Arc<CommandRegistry>,
    listeners: Arc<ListenerRegistry>,
    scheduler: Arc<Scheduler>,
    threads: Arc<ThreadRegistry>,
    completions: Arc<CompletionTracker>,
}

impl ExtensionServices {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        context: ContextId,
        logger: Arc<ExtensionLogger>,
        executor: Arc<TaskExecutor>,
        commands: Arc<CommandRegistry>,
        listeners: Arc<ListenerRegistry>,
        scheduler: Arc<Scheduler>,
        threads: Arc<ThreadRegistry>,
        completions: Arc<CompletionTracker>,
    ) -> Self {
        Self {
            name,
            context,
            logger,
            executor,
            commands,
            listeners,
            scheduler,
            threads,
            completions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn logger(&self) -> &Arc<ExtensionLogger> {
        &self.logger
    }

    /// Register a command owned by this extension. False on collision.
    pub fn register_command(&self, name: &str) -> bool {
        self.commands.register(self.context, name)
    }

    /// Register an event listener owned by this extension.
    pub fn register_listener(&self, name: &str) {
        self.listeners.register(self.context, name);
    }

    /// Spawn a task on the extension's internal executor.
    pub fn spawn<F>(&self, future: F) -> bool
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.executor.spawn(future).is_some()
    }

    /// Run `task` once after `delay` on the host scheduler.
    pub fn schedule_once<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.schedule_once(self.context, delay, task);
    }

    /// Run `task` every `period` on the host scheduler.
    pub fn schedule_repeating<F>(&self, period: Duration, task: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.scheduler.schedule_repeating(self.context, period, task);
    }

    /// Spawn a tracked thread owned by this extension.
    pub fn spawn_thread<F>(&self, name: &str, body: F) -> std::io::Result<()>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        self.threads.spawn(self.context, name, body)
    }

    /// Track an asynchronous operation this extension must signal.
    pub fn track_completion(&self, op: &Arc<dyn PendingCompletion>) {
        self.completions.track(op);
    }
}

/// Render a panic payload as a message.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run a lifecycle hook, containing both errors and panics.
pub(crate) fn run_hook<F>(hook: F) -> std::result::Result<(), String>
where
    F: FnOnce() -> HookResult,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(hook)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_entry_points_resolve_registered_symbols() {
        struct Noop;
        impl Extension for Noop {}

        let builtins = BuiltinEntryPoints::new();
        builtins.register("noop_entry", || Box::new(Noop));

        assert!(builtins.resolve("noop_entry").is_some());
        assert!(builtins.resolve("other").is_none());
    }

    #[test]
    fn test_closed_logger_drops_messages() {
        let logger = ExtensionLogger::new("Foo");
        assert!(!logger.is_closed());
        logger.info("still open");

        logger.close();
        assert!(logger.is_closed());
        logger.info("dropped");
    }

    #[test]
    fn test_run_hook_contains_errors_and_panics() {
        assert!(run_hook(|| Ok(())).is_ok());

        let err = run_hook(|| Err("broken".into())).unwrap_err();
        assert!(err.contains("broken"));

        let err = run_hook(|| panic!("hook exploded")).unwrap_err();
        assert!(err.contains("hook exploded"));
    }
}
