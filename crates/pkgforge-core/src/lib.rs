//! pkgforge-core: source staging and changelog mining for sandboxed package builds
//!
//! Two services used on the host side of a package build:
//!
//! - [`source`]: pinned git mirrors. A [`GitSource`] clones (or refreshes) a
//!   repository into a cache path derived from its URI, checks out the exact
//!   requested revision with a clean tree, and describes how to bind-mount the
//!   mirror into the build sandbox.
//! - [`history`]: a changelog mined from the tags of the package's own recipe
//!   repository, written out as `history.xml` and used to derive a
//!   reproducible build timestamp.
//!
//! Everything here is blocking and single-threaded. Callers that need a
//! deadline must impose it from outside, and must not run two fetches of the
//! same mirror concurrently.

pub mod config;
pub mod error;
pub mod git;
pub mod history;
pub mod source;
pub mod telemetry;

pub use config::{ForgeConfig, DEFAULT_MIRROR_ROOT};
pub use error::ForgeError;
pub use history::{
    is_security_update, CommitId, ManifestParser, PackageHistory, PackageManifest, PackageUpdate,
    YamlManifestParser, MAX_CHANGELOG_ENTRIES, UPDATE_DATE_FORMAT,
};
pub use source::{path_exists, BindConfiguration, GitSource, Source};
pub use telemetry::init_tracing;

/// Result type for pkgforge operations
pub type Result<T> = std::result::Result<T, ForgeError>;
