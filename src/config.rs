//! Extension host configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the extension host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Directory scanned for extension archives
    pub archives_dir: PathBuf,

    /// Directory where archives are extracted, one staging dir per context
    pub work_dir: PathBuf,

    /// How long to wait for an interrupted extension thread to exit
    /// before it is forcibly stopped
    pub thread_grace: Duration,

    /// Worker threads for each extension's internal task executor
    pub executor_threads: usize,
}

impl HostConfig {
    /// Create a new configuration with required paths.
    pub fn new(archives_dir: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            archives_dir,
            work_dir,
            thread_grace: Duration::from_secs(2),
            executor_threads: 2,
        }
    }

    /// Set the grace period for cooperative thread shutdown.
    pub fn with_thread_grace(mut self, grace: Duration) -> Self {
        self.thread_grace = grace;
        self
    }

    /// Set the worker thread count for extension task executors.
    pub fn with_executor_threads(mut self, threads: usize) -> Self {
        self.executor_threads = threads.max(1);
        self
    }

    /// Ensure directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.archives_dir)?;
        std::fs::create_dir_all(&self.work_dir)?;
        Ok(())
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        // Use platform-appropriate default directories
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            archives_dir: data_dir.join("extensions"),
            work_dir: cache_dir.join("extensions"),
            thread_grace: Duration::from_secs(2),
            executor_threads: 2,
        }
    }
}
