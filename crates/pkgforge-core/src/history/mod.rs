//! Automatic changelogs mined from the tag history of a recipe repository.
//!
//! Every tag of the repository is a candidate changelog entry. The recipe
//! manifest is read back from each tagged commit, tags whose manifest is
//! missing or malformed are dropped, and the survivors are ordered by release
//! (newest first) and capped at [`MAX_CHANGELOG_ENTRIES`].
//!
//! The resulting [`PackageHistory`] feeds both the `history.xml` handed to the
//! build sandbox ([`PackageHistory::write_xml`]) and the reproducible build
//! timestamp ([`PackageHistory::last_version_timestamp`]).
//!
//! # Modules
//!
//! - [`commit`]    - raw commit parsing, CVE classification
//! - [`manifest`]  - `ManifestParser` seam and the YAML recipe parser
//! - [`timestamp`] - reproducible timestamp from the last version change
//! - [`xml`]       - `history.xml` rendering

pub mod commit;
pub mod manifest;
pub mod timestamp;
pub mod xml;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::ForgeConfig;
use crate::error::ForgeError;
use crate::git::Git;
use crate::Result;

pub use commit::{is_security_update, CommitId, CommitInfo};
pub use manifest::{ManifestParser, PackageManifest, YamlManifestParser};

/// Absolute maximum number of changelog entries kept.
pub const MAX_CHANGELOG_ENTRIES: usize = 10;

/// `strftime` format of the dates written to `history.xml`, e.g. 2016-09-24.
pub const UPDATE_DATE_FORMAT: &str = "%Y-%m-%d";

/// One tag of the recipe repository whose manifest parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageUpdate {
    /// The tag name, without `refs/tags/`
    pub tag: String,
    pub author: String,
    pub author_email: String,
    /// Full commit message
    pub body: String,
    /// Authored time
    pub time: DateTime<Utc>,
    /// Tagged commit
    pub commit: CommitId,
    /// Manifest as it was at this tag
    pub package: PackageManifest,
    /// Whether the message mentions a CVE id
    pub is_security: bool,
}

/// A tag resolved to its commit, before the manifest has been looked at.
#[derive(Debug)]
struct TaggedCommit {
    tag: String,
    commit: CommitId,
    info: CommitInfo,
}

impl TaggedCommit {
    fn into_update(self, package: PackageManifest) -> PackageUpdate {
        let is_security = is_security_update(&self.info.message);
        PackageUpdate {
            tag: self.tag,
            author: self.info.author,
            author_email: self.info.author_email,
            body: self.info.message,
            time: self.info.time,
            commit: self.commit,
            package,
            is_security,
        }
    }
}

/// The changelog of a package.
///
/// Never empty; updates are ordered by release, highest first, and there are
/// at most [`MAX_CHANGELOG_ENTRIES`] of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageHistory {
    updates: Vec<PackageUpdate>,
    manifest_path: PathBuf,
}

impl PackageHistory {
    /// Mine the history of the repository containing `manifest_path` with the
    /// YAML recipe parser and the default configuration.
    pub fn new(manifest_path: impl AsRef<Path>) -> Result<Self> {
        Self::mine(manifest_path, &YamlManifestParser, &ForgeConfig::default())
    }

    /// Mine the history of the repository rooted at the directory containing
    /// `manifest_path`.
    ///
    /// The manifest is looked up by its file name at the root of each tagged
    /// tree. Tags are visited in descending name order (plain string order,
    /// not version order) before being re-sorted by release.
    #[instrument(skip_all, fields(manifest = %manifest_path.as_ref().display()))]
    pub fn mine(
        manifest_path: impl AsRef<Path>,
        parser: &dyn ManifestParser,
        config: &ForgeConfig,
    ) -> Result<Self> {
        let manifest_path = manifest_path.as_ref();
        let repo_dir = match manifest_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let file_name = manifest_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ForgeError::HistoryOpen {
                path: manifest_path.to_path_buf(),
                message: "manifest path has no file name".to_string(),
            })?;

        let git = open_repository(config, repo_dir)?;

        let mut tagged = list_tagged_commits(&git)?;
        if tagged.is_empty() {
            return Err(ForgeError::NoUsableHistory {
                path: manifest_path.to_path_buf(),
                reason: "repository has no tags".to_string(),
            });
        }
        tagged.sort_by(|a, b| b.tag.cmp(&a.tag));

        let mut updates = Vec::new();
        for candidate in tagged {
            let spec = format!("{}:{}", candidate.commit, file_name);
            let bytes = match git.run_bytes("cat-file", ["cat-file", "blob", spec.as_str()]) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(tag = %candidate.tag, error = %e, "manifest missing at tag");
                    continue;
                }
            };

            // Malformed recipes do happen in old history.
            let package = match parser.parse(&bytes) {
                Ok(package) => package,
                Err(e) => {
                    debug!(tag = %candidate.tag, error = %e, "manifest unparsable at tag");
                    continue;
                }
            };

            updates.push(candidate.into_update(package));
        }

        let history = Self::from_updates(manifest_path, updates)?;
        info!(
            entries = history.updates.len(),
            newest = %history.newest().tag,
            "package history mined"
        );
        Ok(history)
    }

    /// Build a history from already-collected updates: sort by release
    /// (descending, stable), cap, and reject an empty result.
    pub fn from_updates(
        manifest_path: impl AsRef<Path>,
        mut updates: Vec<PackageUpdate>,
    ) -> Result<Self> {
        let manifest_path = manifest_path.as_ref().to_path_buf();

        updates.sort_by(|a, b| b.package.release.cmp(&a.package.release));
        updates.truncate(MAX_CHANGELOG_ENTRIES);

        if updates.is_empty() {
            return Err(ForgeError::NoUsableHistory {
                path: manifest_path,
                reason: "no tag carries a parsable manifest".to_string(),
            });
        }

        Ok(PackageHistory {
            updates,
            manifest_path,
        })
    }

    /// Retained updates, highest release first.
    pub fn updates(&self) -> &[PackageUpdate] {
        &self.updates
    }

    /// Manifest the history was mined for.
    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// The update with the highest release.
    pub fn newest(&self) -> &PackageUpdate {
        // Construction rejects empty histories.
        &self.updates[0]
    }
}

/// Open `dir`, which must be the top level of a git work tree.
fn open_repository(config: &ForgeConfig, dir: &Path) -> Result<Git> {
    let open_error = |message: String| ForgeError::HistoryOpen {
        path: dir.to_path_buf(),
        message,
    };

    let git = config.git(dir);
    let toplevel = git
        .run("rev-parse", ["rev-parse", "--show-toplevel"])
        .map_err(|e| open_error(e.to_string()))?;

    let toplevel = Path::new(toplevel.trim())
        .canonicalize()
        .map_err(|e| open_error(e.to_string()))?;
    let dir = dir.canonicalize().map_err(|e| open_error(e.to_string()))?;
    if toplevel != dir {
        return Err(open_error(format!(
            "not the root of a repository (root is {})",
            toplevel.display()
        )));
    }

    Ok(git)
}

/// `for-each-ref` format: the tag's own object, then the object it peels to,
/// each with the author fields that are set when that object is a commit.
/// Records end in `\x1e` because commit messages span lines.
const TAG_FORMAT: &str = concat!(
    "--format=%(refname:strip=2)",
    "%00%(objecttype)%00%(objectname)",
    "%00%(authorname)%00%(authoremail)%00%(authordate:unix)%00%(contents)",
    "%00%(*objecttype)%00%(*objectname)",
    "%00%(*authorname)%00%(*authoremail)%00%(*authordate:unix)%00%(*contents)",
    "%1e",
);

/// One object as described by a tag listing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ListedObject<'a> {
    kind: &'a str,
    id: &'a str,
    author: &'a str,
    email: &'a str,
    date: &'a str,
    message: &'a str,
}

/// Every tag that resolves to a commit, paired with that commit's metadata.
fn list_tagged_commits(git: &Git) -> Result<Vec<TaggedCommit>> {
    let open_error = |e: ForgeError| ForgeError::HistoryOpen {
        path: git.dir().to_path_buf(),
        message: e.to_string(),
    };

    let listing = git
        .run("for-each-ref", ["for-each-ref", TAG_FORMAT, "refs/tags"])
        .map_err(open_error)?;

    let mut tagged = Vec::new();
    for record in listing.split('\x1e') {
        let record = record.strip_prefix('\n').unwrap_or(record);
        if record.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = record.split('\0').collect();
        let &[
            tag, kind, id, author, email, date, message,
            peeled_kind, peeled_id, peeled_author, peeled_email, peeled_date, peeled_message,
        ] = fields.as_slice()
        else {
            return Err(open_error(ForgeError::git(
                "for-each-ref",
                format!("unexpected tag listing record '{record}'"),
            )));
        };

        let direct = ListedObject {
            kind,
            id,
            author,
            email,
            date,
            message,
        };
        let peeled = ListedObject {
            kind: peeled_kind,
            id: peeled_id,
            author: peeled_author,
            email: peeled_email,
            date: peeled_date,
            message: peeled_message,
        };

        let target = match resolve_tag_target(tag, direct, peeled)? {
            Some(target) => target,
            None => {
                debug!(tag, kind, "tag does not point at a commit");
                continue;
            }
        };

        let info = match CommitInfo::from_ref_fields(
            target.author,
            target.email,
            target.date,
            target.message,
        ) {
            Ok(info) => info,
            Err(e) => {
                debug!(tag, error = %e, "tagged commit malformed");
                continue;
            }
        };

        tagged.push(TaggedCommit {
            tag: tag.to_string(),
            commit: CommitId::new(target.id),
            info,
        });
    }

    Ok(tagged)
}

/// Annotated tags are dereferenced one level; lightweight tags are used as
/// is. Tags of trees or blobs yield `None`.
fn resolve_tag_target<'a>(
    tag: &str,
    direct: ListedObject<'a>,
    peeled: ListedObject<'a>,
) -> Result<Option<ListedObject<'a>>> {
    match direct.kind {
        "commit" => Ok(Some(direct)),
        "tag" if peeled.kind == "commit" => Ok(Some(peeled)),
        "tag" | "tree" | "blob" => Ok(None),
        other => Err(ForgeError::UnresolvableTag {
            tag: tag.to_string(),
            kind: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn update(tag: &str, release: u32, version: &str, seconds: i64) -> PackageUpdate {
        PackageUpdate {
            tag: tag.to_string(),
            author: "Jane Packager".to_string(),
            author_email: "jane@example.com".to_string(),
            body: format!("Update to {version}\n"),
            time: Utc.timestamp_opt(seconds, 0).unwrap(),
            commit: CommitId::new(format!("{release:040}")),
            package: PackageManifest {
                release,
                version: version.to_string(),
            },
            is_security: false,
        }
    }

    #[test]
    fn test_from_updates_orders_by_release() {
        let history = PackageHistory::from_updates(
            "package.yml",
            vec![
                update("v1", 1, "1.0", 100),
                update("v3", 3, "1.1", 300),
                update("v2", 2, "1.0", 200),
            ],
        )
        .unwrap();
        let tags: Vec<&str> = history.updates().iter().map(|u| u.tag.as_str()).collect();
        assert_eq!(tags, ["v3", "v2", "v1"]);
        assert_eq!(history.newest().tag, "v3");
    }

    #[test]
    fn test_from_updates_caps_entries() {
        let updates = (1..=15)
            .map(|r| update(&format!("r{r}"), r, "1.0", i64::from(r)))
            .collect();
        let history = PackageHistory::from_updates("package.yml", updates).unwrap();
        assert_eq!(history.updates().len(), MAX_CHANGELOG_ENTRIES);
        assert_eq!(history.updates()[0].package.release, 15);
        assert_eq!(history.updates()[9].package.release, 6);
    }

    #[test]
    fn test_equal_releases_keep_input_order() {
        let history = PackageHistory::from_updates(
            "package.yml",
            vec![update("b", 1, "1.0", 1), update("a", 1, "1.0", 2)],
        )
        .unwrap();
        assert_eq!(history.updates()[0].tag, "b");
    }

    #[test]
    fn test_empty_history_rejected() {
        let err = PackageHistory::from_updates("package.yml", Vec::new()).unwrap_err();
        assert!(matches!(err, ForgeError::NoUsableHistory { .. }));
    }

    fn object<'a>(kind: &'a str, id: &'a str) -> ListedObject<'a> {
        ListedObject {
            kind,
            id,
            author: "Jane Packager",
            email: "<jane@example.com>",
            date: "0",
            message: "",
        }
    }

    #[test]
    fn test_resolve_tag_target() {
        let commit = "a".repeat(40);
        let tag_obj = "b".repeat(40);
        let none = object("", "");

        assert_eq!(
            resolve_tag_target("v1", object("commit", &commit), none).unwrap(),
            Some(object("commit", &commit))
        );
        assert_eq!(
            resolve_tag_target("v1", object("tag", &tag_obj), object("commit", &commit)).unwrap(),
            Some(object("commit", &commit))
        );
        assert_eq!(
            resolve_tag_target("v1", object("tag", &tag_obj), object("tree", &commit)).unwrap(),
            None
        );
        assert_eq!(resolve_tag_target("v1", object("blob", &commit), none).unwrap(), None);
        assert!(matches!(
            resolve_tag_target("v1", object("bogus", &commit), none),
            Err(ForgeError::UnresolvableTag { .. })
        ));
    }
}
