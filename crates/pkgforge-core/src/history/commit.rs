//! Tagged commits as read back from the recipe repository.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ForgeError;
use crate::Result;

/// Security updates are recognised by a CVE id anywhere in the message.
static CVE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CVE-[0-9]+-[0-9]+").expect("CVE pattern is valid"));

/// Whether a commit message mentions a CVE id.
pub fn is_security_update(body: &str) -> bool {
    CVE_PATTERN.is_match(body)
}

/// Object id of a commit in the recipe repository. Only meaningful while
/// that repository is around.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        CommitId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author and message of a tagged commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub author: String,
    pub author_email: String,
    pub time: DateTime<Utc>,
    pub message: String,
}

impl CommitInfo {
    /// Build from the `authorname`, `authoremail`, `authordate:unix` and
    /// `contents` fields printed by `git for-each-ref`.
    pub fn from_ref_fields(name: &str, email: &str, date: &str, message: &str) -> Result<Self> {
        let malformed =
            || ForgeError::git("for-each-ref", format!("malformed author date '{date}'"));
        let seconds: i64 = date.trim().parse().map_err(|_| malformed())?;
        let time = DateTime::from_timestamp(seconds, 0).ok_or_else(malformed)?;

        let email = email.trim();
        let email = email
            .strip_prefix('<')
            .and_then(|e| e.strip_suffix('>'))
            .unwrap_or(email);

        Ok(CommitInfo {
            author: name.to_string(),
            author_email: email.to_string(),
            time,
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ref_fields() {
        let info = CommitInfo::from_ref_fields(
            "Jane Packager",
            "<jane@example.com>",
            "1614816000",
            "Update to 1.2.4\n\nFixes CVE-2021-0001\n",
        )
        .unwrap();
        assert_eq!(info.author, "Jane Packager");
        assert_eq!(info.author_email, "jane@example.com");
        assert_eq!(info.time.timestamp(), 1614816000);
        assert_eq!(info.message, "Update to 1.2.4\n\nFixes CVE-2021-0001\n");
    }

    #[test]
    fn test_email_without_brackets_kept() {
        let info = CommitInfo::from_ref_fields("A", "a@b", "0", "").unwrap();
        assert_eq!(info.author_email, "a@b");
        assert_eq!(info.message, "");
        assert_eq!(info.time.timestamp(), 0);
    }

    #[test]
    fn test_malformed_dates_rejected() {
        assert!(CommitInfo::from_ref_fields("A", "<a@b>", "", "m").is_err());
        assert!(CommitInfo::from_ref_fields("A", "<a@b>", "yesterday", "m").is_err());
    }

    #[test]
    fn test_security_classification() {
        assert!(is_security_update("Fixes CVE-2021-0001"));
        assert!(is_security_update("Backport fixes for CVE-2020-1 and CVE-2020-2"));
        assert!(!is_security_update("Fixes cve-2021-0001"));
        assert!(!is_security_update("Mentions CVE-2021 without an id"));
        assert!(!is_security_update("Routine update"));
    }

    #[test]
    fn test_commit_id_short() {
        let id = CommitId::new("abcdef1234567890abcdef1234567890abcdef12");
        assert_eq!(id.short(), "abcdef123456");
        assert_eq!(CommitId::new("abc").short(), "abc");
    }
}
