//! Shared helpers for the crate's tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::extension::{Extension, ExtensionServices, HookResult};

/// Build a gzipped tar archive holding a descriptor at `extension.json`.
pub(crate) fn write_archive(dir: &Path, file_name: &str, descriptor: &str) -> PathBuf {
    write_archive_with_entry(dir, file_name, "extension.json", descriptor)
}

/// Build a gzipped tar archive holding a descriptor at an arbitrary entry name.
pub(crate) fn write_archive_with_entry(
    dir: &Path,
    file_name: &str,
    entry_name: &str,
    descriptor: &str,
) -> PathBuf {
    let path = dir.join(file_name);
    let file = std::fs::File::create(&path).unwrap();
    let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);

    let mut header = tar::Header::new_gnu();
    header.set_size(descriptor.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, entry_name, descriptor.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();
    path
}

/// Counters observed by tests to assert which hooks ran.
#[derive(Debug, Default)]
pub(crate) struct HookCounts {
    pub bound: AtomicUsize,
    pub loaded: AtomicUsize,
    pub enabled: AtomicUsize,
    pub disabled: AtomicUsize,
}

/// A well-behaved extension recording its hook invocations.
pub(crate) struct RecordingExtension {
    pub counts: Arc<HookCounts>,
}

impl Extension for RecordingExtension {
    fn bind(&mut self, _services: ExtensionServices) {
        self.counts.bound.fetch_add(1, Ordering::SeqCst);
    }

    fn on_load(&mut self) -> HookResult {
        self.counts.loaded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_enable(&mut self) -> HookResult {
        self.counts.enabled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_disable(&mut self) -> HookResult {
        self.counts.disabled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
