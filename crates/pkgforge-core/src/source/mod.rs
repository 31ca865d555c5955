//! Build sources: things that are fetched on the host and then bind-mounted
//! into the build sandbox.
//!
//! # Modules
//!
//! - [`git`] - `GitSource`, a pinned git mirror refreshed in place

pub mod git;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

pub use git::GitSource;

/// A host-to-sandbox bind mount. Produced on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfiguration {
    /// Path on the host
    pub host_path: PathBuf,
    /// Path inside the sandbox
    pub guest_path: PathBuf,
}

/// A source declared by a build recipe.
pub trait Source {
    /// Make the source available locally.
    fn fetch(&self) -> Result<()>;

    /// Whether [`Source::fetch`] can be skipped.
    fn is_fetched(&self) -> bool;

    /// How the fetched source appears inside the sandbox, given the
    /// sandbox's source directory.
    fn bind_configuration(&self, sandbox_source_dir: &Path) -> BindConfiguration;

    /// Human readable identifier for logs and errors.
    fn identifier(&self) -> String;
}

/// Whether anything exists at `path`.
pub fn path_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}
