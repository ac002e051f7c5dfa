//! Running extension instances.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::context::{ContextId, IsolationContext};
use crate::executor::TaskExecutor;
use crate::extension::{Extension, ExtensionLogger};
use crate::manifest::ExtensionManifest;

/// Lifecycle state of an extension instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed and registered, hooks may not have completed
    Created,
    /// Running; may hold threads, executors, registrations
    Enabled,
    /// Shutdown requested, teardown in progress
    Disabling,
    /// All resources reclaimed, registry entry removed
    Destroyed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Enabled => write!(f, "enabled"),
            Self::Disabling => write!(f, "disabling"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// A loaded extension: manifest, isolation context, entry-point object,
/// and the per-instance resources the host hands it.
///
/// Owned by the registry for its running lifetime; destroyed on unload.
pub struct ExtensionInstance {
    manifest: ExtensionManifest,
    context_id: ContextId,
    context: Mutex<IsolationContext>,
    extension: Mutex<Box<dyn Extension>>,
    state: Mutex<LifecycleState>,
    logger: Arc<ExtensionLogger>,
    executor: Arc<TaskExecutor>,
}

impl ExtensionInstance {
    pub(crate) fn new(
        manifest: ExtensionManifest,
        context: IsolationContext,
        extension: Box<dyn Extension>,
        logger: Arc<ExtensionLogger>,
        executor: Arc<TaskExecutor>,
    ) -> Self {
        Self {
            context_id: context.id(),
            manifest,
            context: Mutex::new(context),
            extension: Mutex::new(extension),
            state: Mutex::new(LifecycleState::Created),
            logger,
            executor,
        }
    }

    /// Declared extension name.
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    /// Archive this instance was loaded from; used by reload directly,
    /// without re-searching the archive directory.
    pub fn archive_path(&self) -> &Path {
        &self.manifest.archive
    }

    /// Identity of the instance's isolation context.
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(LifecycleState::Destroyed)
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    pub fn logger(&self) -> &Arc<ExtensionLogger> {
        &self.logger
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub(crate) fn extension(&self) -> &Mutex<Box<dyn Extension>> {
        &self.extension
    }

    pub(crate) fn context(&self) -> &Mutex<IsolationContext> {
        &self.context
    }
}
