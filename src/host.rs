//! The extension host: drives load, unload, and reload.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use crate::completions::CompletionTracker;
use crate::config::HostConfig;
use crate::context::{ContextSet, IsolationContext};
use crate::error::{HostError, Result};
use crate::extension::{
    panic_message, run_hook, BuiltinEntryPoints, Extension, ExtensionLogger, ExtensionServices,
};
use crate::executor::TaskExecutor;
use crate::instance::{ExtensionInstance, LifecycleState};
use crate::manifest;
use crate::reaper;
use crate::registry::{CommandRegistry, ExtensionRegistry, ListenerRegistry};
use crate::scheduler::Scheduler;
use crate::threads::ThreadRegistry;

/// Extension lifecycle manager.
///
/// An explicit handle the embedding host creates at startup and passes to
/// whatever surface triggers lifecycle transitions. Owns the extension
/// registry and the process-wide bookkeeping that teardown repairs.
///
/// Callers must not issue concurrent lifecycle requests for the same
/// extension name; interleaved load/unload of one name can corrupt the
/// registry. Concurrent requests for different names are fine.
pub struct ExtensionHost {
    config: HostConfig,
    registry: Arc<ExtensionRegistry>,
    commands: Arc<CommandRegistry>,
    listeners: Arc<ListenerRegistry>,
    contexts: Arc<ContextSet>,
    threads: Arc<ThreadRegistry>,
    scheduler: Arc<Scheduler>,
    completions: Arc<CompletionTracker>,
    builtins: BuiltinEntryPoints,
}

impl ExtensionHost {
    /// Create a new extension host.
    pub fn new(config: HostConfig) -> Result<Self> {
        config.ensure_dirs()?;

        Ok(Self {
            config,
            registry: Arc::new(ExtensionRegistry::new()),
            commands: Arc::new(CommandRegistry::new()),
            listeners: Arc::new(ListenerRegistry::new()),
            contexts: Arc::new(ContextSet::new()),
            threads: Arc::new(ThreadRegistry::new()),
            scheduler: Arc::new(Scheduler::new()?),
            completions: Arc::new(CompletionTracker::new()),
            builtins: BuiltinEntryPoints::new(),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Register a statically linked entry point, consulted before the
    /// archive's dynamic library when resolving a manifest's `main`.
    pub fn register_builtin<F>(&self, symbol: &str, ctor: F)
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        self.builtins.register(symbol, ctor);
    }

    // === Lifecycle ===

    /// Load the extension named `name`, resolving its archive from the
    /// archive directory (case-insensitive).
    pub fn load(&self, name: &str) -> Result<()> {
        let archive = manifest::find_archive(&self.config.archives_dir, name)?;
        self.load_archive(&archive)
    }

    /// Load an extension from an archive path.
    pub fn load_archive(&self, archive: &Path) -> Result<()> {
        self.try_load_archive(archive).map_err(|e| {
            tracing::error!(archive = %archive.display(), error = %e, "failed to load extension");
            e
        })
    }

    /// Unload the extension named `name` (case-insensitive) and reclaim
    /// everything it owns.
    pub fn unload(&self, name: &str) -> Result<()> {
        let instance = self
            .registry
            .find(name)
            .ok_or_else(|| HostError::NotLoaded(name.to_string()))?;

        tracing::info!(extension = %instance.name(), "unloading extension");
        instance.set_state(LifecycleState::Disabling);

        reaper::reap(
            &instance,
            &self.commands,
            &self.listeners,
            &self.scheduler,
            &self.threads,
            &self.completions,
            self.config.thread_grace,
        );

        self.registry.remove(instance.name());
        instance.set_state(LifecycleState::Destroyed);
        tracing::info!(extension = %instance.name(), "extension unloaded");
        Ok(())
    }

    /// Reload: unload the running instance, then load the same archive
    /// path again. The archive path comes from the instance itself, not a
    /// re-scan; a deleted archive fails exactly as load would.
    pub fn reload(&self, name: &str) -> Result<()> {
        let instance = self
            .registry
            .find(name)
            .ok_or_else(|| HostError::NotLoaded(name.to_string()))?;
        let archive = instance.archive_path().to_path_buf();
        drop(instance);

        self.unload(name)?;
        self.load_archive(&archive)
    }

    // === Queries ===

    /// Declared names of all loaded extensions.
    pub fn loaded(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Whether an extension with this name is loaded (case-insensitive).
    pub fn is_loaded(&self, name: &str) -> bool {
        self.registry.find(name).is_some()
    }

    /// Commands registered by the named extension.
    pub fn commands_of(&self, name: &str) -> Result<Vec<String>> {
        let instance = self
            .registry
            .find(name)
            .ok_or_else(|| HostError::NotLoaded(name.to_string()))?;
        Ok(self.commands.names_owned_by(instance.context_id()))
    }

    // === Shared host state (repair seam for the embedding host) ===

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    pub fn commands(&self) -> &Arc<CommandRegistry> {
        &self.commands
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn contexts(&self) -> &Arc<ContextSet> {
        &self.contexts
    }

    pub fn threads(&self) -> &Arc<ThreadRegistry> {
        &self.threads
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn completions(&self) -> &Arc<CompletionTracker> {
        &self.completions
    }

    fn try_load_archive(&self, archive: &Path) -> Result<()> {
        // 1. Manifest.
        let manifest = manifest::read_manifest(archive)?;
        let name = manifest.name.clone();

        if self.registry.find(&name).is_some() {
            return Err(HostError::AlreadyLoaded(name));
        }

        // 2. Dependencies, before anything is created.
        for dependency in &manifest.depends {
            if self.registry.find(dependency).is_none() {
                return Err(HostError::MissingDependency {
                    extension: name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        // 3. Fresh isolation context.
        let mut context =
            IsolationContext::create(archive, &name, &self.config.work_dir, &self.contexts)?;

        // 4. Entry point: builtin first, then the archive's library.
        let extension = match self.builtins.resolve(&manifest.main) {
            Some(ctor) => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| (*ctor)())) {
                    Ok(extension) => extension,
                    Err(payload) => {
                        context.release();
                        return Err(HostError::instantiation(
                            &manifest.main,
                            panic_message(payload),
                        ));
                    }
                }
            }
            None => match context.resolve_ctor(&manifest.main) {
                Ok(extension) => extension,
                Err(e) => {
                    context.release();
                    return Err(e);
                }
            },
        };

        let executor = match TaskExecutor::new(&name, self.config.executor_threads) {
            Ok(executor) => Arc::new(executor),
            Err(e) => {
                context.release();
                return Err(e.into());
            }
        };
        let logger = Arc::new(ExtensionLogger::new(&name));
        let context_id = context.id();

        let instance = Arc::new(ExtensionInstance::new(
            manifest,
            context,
            extension,
            logger.clone(),
            executor.clone(),
        ));

        // 5. Privileged initializer. A failure here is still fully
        // recoverable: nothing has touched the registry yet.
        let services = ExtensionServices::new(
            name.clone(),
            context_id,
            logger,
            executor,
            self.commands.clone(),
            self.listeners.clone(),
            self.scheduler.clone(),
            self.threads.clone(),
            self.completions.clone(),
        );
        let bind_result: std::result::Result<(), String> = match instance.extension().lock() {
            Ok(mut extension) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| extension.bind(services)))
                    .map_err(panic_message)
            }
            Err(_) => Err("extension lock poisoned".to_string()),
        };
        if let Err(message) = bind_result {
            instance.executor().shutdown_now();
            if let Ok(mut context) = instance.context().lock() {
                context.release();
            }
            return Err(HostError::Hook {
                extension: name,
                hook: "bind",
                message,
            });
        }

        // 6. Registry insertion happens BEFORE the load/enable hooks run.
        // An extension that fails in a hook below stays registered; a
        // later unload still tears it down. Do not reorder.
        self.registry.insert(instance.clone());

        for hook in ["on_load", "on_enable"] {
            let result = match instance.extension().lock() {
                Ok(mut extension) => run_hook(|| {
                    if hook == "on_load" {
                        extension.on_load()
                    } else {
                        extension.on_enable()
                    }
                }),
                Err(_) => Err("extension lock poisoned".to_string()),
            };
            if let Err(cause) = result {
                tracing::error!(extension = %name, hook, %cause, "lifecycle hook failed");
                return Err(HostError::Hook {
                    extension: name,
                    hook,
                    message: cause,
                });
            }
        }

        instance.set_state(LifecycleState::Enabled);
        tracing::info!(extension = %name, context = %context_id, "extension loaded");
        Ok(())
    }
}
