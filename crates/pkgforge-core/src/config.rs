//! Runtime configuration for source staging

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::git::Git;

/// Default base directory for all cached git mirrors
pub const DEFAULT_MIRROR_ROOT: &str = "/var/lib/pkgforge/sources/git";

/// Configuration shared by every [`GitSource`](crate::GitSource)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgeConfig {
    /// Root under which mirrors are laid out as `host/dirname/basename.git`
    pub mirror_root: PathBuf,
    /// git executable to invoke
    pub git_program: String,
    /// Extra `name=value` settings handed to every git invocation as `-c`
    #[serde(default)]
    pub git_options: Vec<String>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        ForgeConfig {
            mirror_root: std::env::var("PKGFORGE_MIRROR_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_MIRROR_ROOT)),
            git_program: std::env::var("PKGFORGE_GIT").unwrap_or_else(|_| "git".to_string()),
            git_options: Vec::new(),
        }
    }
}

impl ForgeConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Use a different mirror root
    pub fn with_mirror_root(mut self, root: impl AsRef<Path>) -> Self {
        self.mirror_root = root.as_ref().to_path_buf();
        self
    }

    /// Use a different git executable
    pub fn with_git_program(mut self, program: &str) -> Self {
        self.git_program = program.to_string();
        self
    }

    /// Add a `name=value` git setting, e.g. `protocol.file.allow=always`
    pub fn with_git_option(mut self, option: &str) -> Self {
        self.git_options.push(option.to_string());
        self
    }

    pub(crate) fn git(&self, dir: impl Into<PathBuf>) -> Git {
        Git::new(&self.git_program, dir).with_options(self.git_options.iter().cloned())
    }
}
