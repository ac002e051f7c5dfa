//! Extension host for loading, unloading and reloading extensions at
//! runtime.
//!
//! The host keeps a long-running process's bookkeeping consistent while
//! extensions come and go: each loaded extension runs inside its own
//! isolation context, and unloading tears down every resource the
//! extension created (registrations, scheduled work, its task executor,
//! its threads, and any asynchronous completions other parties are still
//! waiting on) even when the extension cooperates poorly or not at all.
//!
//! # Example
//!
//! ```rust,ignore
//! use lib_extension_host::{ExtensionHost, HostConfig};
//! use std::path::PathBuf;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HostConfig::new(
//!         PathBuf::from("/srv/myapp/extensions"),
//!         PathBuf::from("/var/cache/myapp/extensions"),
//!     );
//!
//!     let host = ExtensionHost::new(config)?;
//!
//!     host.load("weather")?;
//!     println!("loaded: {:?}", host.loaded());
//!
//!     host.reload("weather")?;
//!     host.unload("weather")?;
//!
//!     Ok(())
//! }
//! ```

mod completions;
mod config;
mod context;
mod error;
mod executor;
mod extension;
mod host;
mod instance;
mod manifest;
mod reaper;
mod registry;
mod scheduler;
mod threads;

#[cfg(test)]
mod testutil;

pub use completions::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use executor::*;
pub use extension::*;
pub use host::*;
pub use instance::*;
pub use manifest::*;
pub use registry::*;
pub use scheduler::*;
pub use threads::*;
