//! Extension manifests and archive resolution.
//!
//! An extension ships as a gzipped tarball containing a descriptor entry
//! at one of two well-known names plus the extension's dynamic library.

use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};

/// Well-known descriptor entry names, tried in order.
pub const DESCRIPTOR_ENTRIES: [&str; 2] = ["extension.json", "manifest.json"];

/// Parsed extension descriptor.
///
/// Immutable once read from the archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Unique extension name. Compared case-insensitively everywhere,
    /// stored with its declared casing.
    pub name: String,

    /// Entry-point symbol constructed on load.
    pub main: String,

    /// Names of extensions that must already be loaded.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Declared version, informational only.
    #[serde(default)]
    pub version: Option<String>,

    /// Free-form description, informational only.
    #[serde(default)]
    pub description: Option<String>,

    /// Archive the manifest was read from. Not part of the descriptor.
    #[serde(skip)]
    pub archive: PathBuf,
}

impl ExtensionManifest {
    /// Case-insensitive name comparison used by all lifecycle lookups.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Read and parse the descriptor entry out of an archive.
///
/// Fails if the archive cannot be opened, no descriptor entry exists at a
/// well-known name, or the descriptor does not parse.
pub fn read_manifest(archive: &Path) -> Result<ExtensionManifest> {
    let file = std::fs::File::open(archive)
        .map_err(|e| HostError::manifest(archive.display().to_string(), e.to_string()))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));

    let entries = tar
        .entries()
        .map_err(|e| HostError::manifest(archive.display().to_string(), e.to_string()))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| HostError::manifest(archive.display().to_string(), e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| HostError::manifest(archive.display().to_string(), e.to_string()))?;

        let is_descriptor = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| DESCRIPTOR_ENTRIES.contains(&n) && path.components().count() == 1)
            .unwrap_or(false);
        if !is_descriptor {
            continue;
        }

        let mut raw = String::new();
        entry
            .read_to_string(&mut raw)
            .map_err(|e| HostError::manifest(archive.display().to_string(), e.to_string()))?;

        let mut manifest: ExtensionManifest = serde_json::from_str(&raw)
            .map_err(|e| HostError::manifest(archive.display().to_string(), e.to_string()))?;
        if manifest.name.is_empty() || manifest.main.is_empty() {
            return Err(HostError::manifest(
                archive.display().to_string(),
                "descriptor must declare non-empty 'name' and 'main'",
            ));
        }
        manifest.archive = archive.to_path_buf();
        return Ok(manifest);
    }

    Err(HostError::manifest(
        archive.display().to_string(),
        format!("no descriptor entry ({})", DESCRIPTOR_ENTRIES.join(" or ")),
    ))
}

/// Locate the archive whose manifest name matches `name`, case-insensitively.
///
/// Read-only, best-effort scan: a corrupt archive is skipped with a logged
/// warning rather than failing the search. As a fallback a literal
/// `<name>.tar.gz` file is accepted if present.
pub fn find_archive(dir: &Path, name: &str) -> Result<PathBuf> {
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || !is_archive_file(&path) {
                continue;
            }
            match read_manifest(&path) {
                Ok(manifest) if manifest.matches_name(name) => return Ok(path),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(archive = %path.display(), error = %e, "skipping unreadable archive");
                }
            }
        }
    }

    let fallback = dir.join(format!("{name}.tar.gz"));
    if fallback.is_file() {
        return Ok(fallback);
    }

    Err(HostError::NotFound(name.to_string()))
}

fn is_archive_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    name.ends_with(".tar.gz") || name.ends_with(".tgz")
}
