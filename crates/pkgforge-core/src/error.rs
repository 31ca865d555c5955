//! Error types for pkgforge-core

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while staging sources or mining package history
#[derive(Error, Debug)]
pub enum ForgeError {
    /// The source URI could not be turned into a mirror location
    #[error("invalid source URI '{uri}': {reason}")]
    InvalidSource { uri: String, reason: String },

    /// A git operation failed; `message` is git's own diagnostic
    #[error("git {step} failed: {message}")]
    Git { step: &'static str, message: String },

    /// The recipe repository could not be opened or its tags listed
    #[error("cannot open history at {path:?}: {message}")]
    HistoryOpen { path: PathBuf, message: String },

    /// A tag reference points at an object type git itself does not know
    #[error("internal git error: tag '{tag}' has unresolvable type '{kind}'")]
    UnresolvableTag { tag: String, kind: String },

    /// No tag yielded a parsable manifest
    #[error("no usable git history found for {path:?}: {reason}")]
    NoUsableHistory { path: PathBuf, reason: String },

    /// A recipe manifest could not be parsed
    #[error("invalid manifest: {0}")]
    Manifest(String),

    /// Changelog could not be rendered or written
    #[error("changelog serialization failed: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    pub(crate) fn git(step: &'static str, message: impl Into<String>) -> Self {
        ForgeError::Git {
            step,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_source(uri: &str, reason: impl Into<String>) -> Self {
        ForgeError::InvalidSource {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_yaml::Error> for ForgeError {
    fn from(err: serde_yaml::Error) -> Self {
        ForgeError::Manifest(err.to_string())
    }
}

impl From<quick_xml::Error> for ForgeError {
    fn from(err: quick_xml::Error) -> Self {
        ForgeError::Serialization(err.to_string())
    }
}
