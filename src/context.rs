//! Isolation contexts: per-extension loading boundaries.
//!
//! Each loaded extension owns exactly one context, scoped to its archive.
//! A context is never shared and never reused: reloading an extension
//! creates a brand-new context even for an identical archive path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::read::GzDecoder;
use libloading::{Library, Symbol};

use crate::error::{HostError, Result};
use crate::extension::{panic_message, Extension};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an isolation context.
///
/// Everything an extension creates (threads, registrations, scheduled
/// tasks) is attributed to this id, and teardown matches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Process-wide set of live isolation contexts.
///
/// Releasing a context removes it here, which is what makes the context
/// (and anything keyed on its identity) eligible for reclamation.
pub struct ContextSet {
    live: Mutex<HashSet<ContextId>>,
}

impl ContextSet {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashSet::new()),
        }
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.live.lock().map(|s| s.contains(&id)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.live.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, id: ContextId) {
        if let Ok(mut live) = self.live.lock() {
            live.insert(id);
        }
    }

    fn remove(&self, id: ContextId) {
        if let Ok(mut live) = self.live.lock() {
            live.remove(&id);
        }
    }
}

impl Default for ContextSet {
    fn default() -> Self {
        Self::new()
    }
}

/// An execution/loading boundary scoped 1:1 to one extension instance.
pub struct IsolationContext {
    id: ContextId,
    staging_dir: PathBuf,
    library: Option<Library>,
    live: Arc<ContextSet>,
    released: bool,
}

impl IsolationContext {
    /// Create a fresh context for `archive`, extracting it into its own
    /// staging directory under `work_dir`.
    pub fn create(
        archive: &Path,
        name: &str,
        work_dir: &Path,
        live: &Arc<ContextSet>,
    ) -> Result<Self> {
        let id = ContextId::next();
        let staging_dir = work_dir.join(format!("{}-{}", sanitize_dir_name(name), id));

        std::fs::create_dir_all(&staging_dir)?;
        let file = std::fs::File::open(archive)?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        if let Err(e) = tar.unpack(&staging_dir) {
            let _ = std::fs::remove_dir_all(&staging_dir);
            return Err(HostError::manifest(
                archive.display().to_string(),
                e.to_string(),
            ));
        }

        live.insert(id);
        tracing::debug!(context = %id, dir = %staging_dir.display(), "created isolation context");

        Ok(Self {
            id,
            staging_dir,
            library: None,
            live: live.clone(),
            released: false,
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Open the extension's dynamic library and construct its entry point.
    ///
    /// The library handle is retained by the context so the extension's
    /// code stays mapped until the context is released.
    pub fn resolve_ctor(&mut self, symbol: &str) -> Result<Box<dyn Extension>> {
        let lib_path = find_library_path(&self.staging_dir).ok_or_else(|| {
            HostError::instantiation(symbol, "archive contains no dynamic library")
        })?;

        // SAFETY: Loading and calling a foreign entry point is inherently
        // unsafe; the archive is trusted by the embedding host.
        let library = unsafe { Library::new(&lib_path) }
            .map_err(|e| HostError::instantiation(symbol, e.to_string()))?;

        let extension = {
            // SAFETY: Symbol type matches the entry-point contract.
            let ctor: Symbol<fn() -> Box<dyn Extension>> = unsafe {
                library
                    .get(symbol.as_bytes())
                    .map_err(|e| HostError::instantiation(symbol, e.to_string()))?
            };
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| ctor()))
                .map_err(|payload| HostError::instantiation(symbol, panic_message(payload)))?
        };

        self.library = Some(library);
        Ok(extension)
    }

    /// Release everything the context owns: close the library, delete the
    /// staging directory, and drop out of the live set. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        self.library = None;
        if let Err(e) = std::fs::remove_dir_all(&self.staging_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(context = %self.id, error = %e, "failed to remove staging dir");
            }
        }
        self.live.remove(self.id);
        tracing::debug!(context = %self.id, "released isolation context");
    }
}

impl Drop for IsolationContext {
    fn drop(&mut self) {
        self.release();
    }
}

/// Find the extension's dynamic library in the staging directory, trying
/// the platform's library extension.
fn find_library_path(dir: &Path) -> Option<PathBuf> {
    let ext = if cfg!(target_os = "macos") {
        "dylib"
    } else if cfg!(target_os = "windows") {
        "dll"
    } else {
        "so"
    };

    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(ext) {
            return Some(path);
        }
    }
    None
}

fn sanitize_dir_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            c
        } else {
            '_'
        })
        .collect()
}
