//! Error types for extension host operations.

use thiserror::Error;

/// Errors that can occur during extension host operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// Descriptor entry missing from the archive, or malformed
    #[error("Manifest error in {archive}: {message}")]
    Manifest { archive: String, message: String },

    /// A declared dependency is not currently loaded
    #[error("Dependency '{dependency}' (required by {extension}) is not loaded")]
    MissingDependency {
        extension: String,
        dependency: String,
    },

    /// Entry point could not be constructed
    #[error("Failed to instantiate '{entry}': {message}")]
    Instantiation { entry: String, message: String },

    /// Name collision on load
    #[error("Extension already loaded: {0}")]
    AlreadyLoaded(String),

    /// Target missing on unload/reload
    #[error("Extension not loaded: {0}")]
    NotLoaded(String),

    /// A lifecycle hook failed or panicked
    #[error("Extension '{extension}' failed in {hook} hook: {message}")]
    Hook {
        extension: String,
        hook: &'static str,
        message: String,
    },

    /// No archive in the archive directory matches the requested name
    #[error("No archive found for extension: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    pub(crate) fn manifest(archive: impl Into<String>, message: impl Into<String>) -> Self {
        HostError::Manifest {
            archive: archive.into(),
            message: message.into(),
        }
    }

    pub(crate) fn instantiation(entry: impl Into<String>, message: impl Into<String>) -> Self {
        HostError::Instantiation {
            entry: entry.into(),
            message: message.into(),
        }
    }
}

/// Result type for extension host operations
pub type Result<T> = std::result::Result<T, HostError>;
