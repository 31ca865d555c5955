//! Git sources pinned to an exact revision.
//!
//! A [`GitSource`] owns one mirror under the configured mirror root. The
//! mirror location is derived only from the source URI, so every build that
//! names the same repository shares (and refreshes) the same clone.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{path_exists, BindConfiguration, Source};
use crate::config::ForgeConfig;
use crate::error::ForgeError;
use crate::git::{is_full_object_id, Git};
use crate::Result;

/// A git source as referenced by a build recipe: a repository URI plus the
/// revision to check out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    uri: String,
    git_ref: String,
    base_name: String,
    clone_path: PathBuf,
    git_program: String,
    git_options: Vec<String>,
}

impl GitSource {
    /// Create a source using the mirror root from the environment.
    pub fn new(uri: &str, git_ref: &str) -> Result<Self> {
        Self::with_config(uri, git_ref, &ForgeConfig::default())
    }

    /// Create a source rooted under `config.mirror_root`.
    ///
    /// The clone path is `mirror_root/host/dirname(path)/basename`, where the
    /// basename always ends in `.git`.
    pub fn with_config(uri: &str, git_ref: &str, config: &ForgeConfig) -> Result<Self> {
        let parsed = Url::parse(uri).map_err(|e| ForgeError::invalid_source(uri, e.to_string()))?;
        let (parent, base_name) = split_repository_path(uri, parsed.path())?;

        let mut clone_path = config.mirror_root.clone();
        if let Some(host) = parsed.host_str() {
            match parsed.port() {
                Some(port) => clone_path.push(format!("{host}:{port}")),
                None => clone_path.push(host),
            }
        }
        clone_path.push(parent);
        clone_path.push(&base_name);

        debug!(uri, reference = git_ref, path = %clone_path.display(), "git source");

        Ok(GitSource {
            uri: uri.to_string(),
            git_ref: git_ref.to_string(),
            base_name,
            clone_path,
            git_program: config.git_program.clone(),
            git_options: config.git_options.clone(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }

    /// Final path component of the mirror, always ending in `.git`.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Where the mirror lives on the host.
    pub fn clone_path(&self) -> &Path {
        &self.clone_path
    }

    /// Clone or refresh the mirror, then leave its working tree at exactly
    /// the resolved revision with no untracked files.
    #[instrument(skip(self), fields(source = %self.identifier()))]
    pub fn fetch(&self) -> Result<()> {
        if !path_exists(&self.clone_path) {
            debug!(path = %self.clone_path.display(), "making clone of repository");
            self.clone_mirror()?;
        } else {
            debug!(path = %self.clone_path.display(), "source clone found on disk");
        }

        let git = self.open()?;

        // Exits 0 when there is nothing new.
        git.run("fetch", ["fetch", "--force", "--tags", "origin"])?;

        let commit = self.resolve(&git)?;
        info!(commit = %commit, "resolved reference");

        git.run("checkout", ["checkout", "--force", "--detach", commit.as_str()])?;
        git.run("reset", ["reset", "--hard", commit.as_str()])?;
        git.run("clean", ["clean", "-ffdx"])?;

        self.normalize_pack_permissions()?;

        self.update_submodules(&git)
    }

    /// Always false: every call to [`GitSource::fetch`] refreshes the mirror.
    pub fn is_fetched(&self) -> bool {
        false
    }

    /// Bind the mirror into the sandbox at `sandbox_source_dir/base_name`.
    /// The in-sandbox tooling clones from it locally.
    pub fn bind_configuration(&self, sandbox_source_dir: &Path) -> BindConfiguration {
        BindConfiguration {
            host_path: self.clone_path.clone(),
            guest_path: sandbox_source_dir.join(&self.base_name),
        }
    }

    /// `URI#ref`, for logs and errors only.
    pub fn identifier(&self) -> String {
        format!("{}#{}", self.uri, self.git_ref)
    }

    /// Commit id currently checked out in the mirror.
    pub fn head(&self) -> Result<String> {
        let git = self.open()?;
        let head = git.run("rev-parse", ["rev-parse", "HEAD"])?;
        Ok(head.trim().to_string())
    }

    fn git(&self, dir: &Path) -> Git {
        Git::new(&self.git_program, dir).with_options(self.git_options.iter().cloned())
    }

    fn clone_mirror(&self) -> Result<()> {
        let parent = self
            .clone_path
            .parent()
            .ok_or_else(|| ForgeError::invalid_source(&self.uri, "clone path has no parent"))?;
        std::fs::create_dir_all(parent)?;

        // Object store only; the working tree is produced by the checkout
        // that follows.
        self.git(parent).run(
            "clone",
            [
                OsStr::new("clone"),
                OsStr::new("--no-checkout"),
                OsStr::new("--recurse-submodules"),
                OsStr::new(&self.uri),
                self.clone_path.as_os_str(),
            ],
        )?;
        Ok(())
    }

    fn open(&self) -> Result<Git> {
        if !path_exists(&self.clone_path.join(".git")) {
            return Err(ForgeError::git(
                "open",
                format!("{} is not a git clone", self.clone_path.display()),
            ));
        }
        let git = self.git(&self.clone_path);
        git.run("open", ["rev-parse", "--git-dir"])?;
        Ok(git)
    }

    fn resolve(&self, git: &Git) -> Result<String> {
        if is_full_object_id(&self.git_ref) {
            return Ok(self.git_ref.clone());
        }

        debug!(reference = %self.git_ref, "reference does not look like a hash; attempting to resolve");

        if self.git_ref.is_empty() || self.git_ref.starts_with('-') {
            return Err(ForgeError::git(
                "resolve",
                format!("invalid revision '{}'", self.git_ref),
            ));
        }

        // Local branches are only created at clone time and never move, so
        // prefer the remote-tracking ref the fetch just updated.
        let remote_branch = format!("refs/remotes/origin/{}^{{commit}}", self.git_ref);
        let revision = if git.succeeds(["rev-parse", "--verify", "--quiet", remote_branch.as_str()]) {
            remote_branch
        } else {
            format!("{}^{{commit}}", self.git_ref)
        };

        let commit = git.run("resolve", ["rev-parse", "--verify", revision.as_str()])?;
        Ok(commit.trim().to_string())
    }

    /// Steps above may run as root, which leaves pack files unreadable to the
    /// unprivileged build user.
    fn normalize_pack_permissions(&self) -> Result<()> {
        let pack_dir = self.clone_path.join(".git").join("objects").join("pack");
        normalize_pack_dir(&pack_dir, make_world_readable)
    }

    fn update_submodules(&self, git: &Git) -> Result<()> {
        if !path_exists(&self.clone_path.join(".gitmodules")) {
            return Ok(());
        }

        debug!("updating submodules");
        git.run("submodule sync", ["submodule", "sync", "--recursive"])?;
        git.run(
            "submodule update",
            ["submodule", "update", "--init", "--recursive", "--force"],
        )?;
        Ok(())
    }
}

impl Source for GitSource {
    fn fetch(&self) -> Result<()> {
        GitSource::fetch(self)
    }

    fn is_fetched(&self) -> bool {
        GitSource::is_fetched(self)
    }

    fn bind_configuration(&self, sandbox_source_dir: &Path) -> BindConfiguration {
        GitSource::bind_configuration(self, sandbox_source_dir)
    }

    fn identifier(&self) -> String {
        GitSource::identifier(self)
    }
}

/// Apply `chmod` to every regular file in `pack_dir`. Per-file failures are
/// logged and skipped; a missing directory means there is nothing to do.
fn normalize_pack_dir<F>(pack_dir: &Path, chmod: F) -> Result<()>
where
    F: Fn(&Path) -> std::io::Result<()>,
{
    let entries = match std::fs::read_dir(pack_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %pack_dir.display(), "no pack directory");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %pack_dir.display(), error = %e, "error reading pack directory entry");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if let Err(e) = chmod(&path) {
            warn!(file = %path.display(), error = %e, "error updating pack file permissions");
        }
    }

    Ok(())
}

/// Split a URL path into its directory (relative) and a `.git` basename.
/// Segments are percent-decoded, so the mirror is laid out by the decoded
/// path.
fn split_repository_path(uri: &str, path: &str) -> Result<(PathBuf, String)> {
    let trimmed = Path::new(path.trim_end_matches('/'));

    let mut segments = Vec::new();
    for component in trimmed.components() {
        match component {
            Component::RootDir => {}
            Component::Normal(segment) => segments.push(decode_segment(uri, segment)?),
            Component::CurDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(ForgeError::invalid_source(
                    uri,
                    "path must not contain relative segments",
                ));
            }
        }
    }

    let mut base_name = segments
        .pop()
        .ok_or_else(|| ForgeError::invalid_source(uri, "URI has no repository path"))?;
    if !base_name.ends_with(".git") {
        base_name.push_str(".git");
    }

    Ok((segments.iter().collect(), base_name))
}

fn decode_segment(uri: &str, segment: &OsStr) -> Result<String> {
    let segment = segment.to_string_lossy();
    let decoded = percent_decode_str(&segment)
        .decode_utf8()
        .map_err(|e| ForgeError::invalid_source(uri, format!("path is not UTF-8: {e}")))?;

    // Encoded separators or dot segments would escape the mirror layout.
    if decoded.is_empty()
        || decoded == "."
        || decoded == ".."
        || decoded.contains(['/', '\\', '\0'])
    {
        return Err(ForgeError::invalid_source(
            uri,
            format!("invalid path segment '{segment}'"),
        ));
    }

    Ok(decoded.into_owned())
}

#[cfg(unix)]
fn make_world_readable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_world_readable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
