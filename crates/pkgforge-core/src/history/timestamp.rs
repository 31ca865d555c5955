//! Reproducible build timestamps.
//!
//! Release bumps that keep the version string (rebuilds, packaging fixes)
//! should not move the build timestamp, otherwise every trivial bump produces
//! a byte-different package and larger deltas.

use super::{PackageHistory, PackageUpdate};

impl PackageHistory {
    /// Unix timestamp of the oldest update in the newest run of updates that
    /// share the newest version.
    pub fn last_version_timestamp(&self) -> i64 {
        // Histories are never empty, so there is always a newest update.
        last_version_timestamp(&self.updates).unwrap_or_else(|| self.newest().time.timestamp())
    }
}

/// Same as [`PackageHistory::last_version_timestamp`] over a bare slice
/// ordered newest first; `None` when empty.
pub fn last_version_timestamp(updates: &[PackageUpdate]) -> Option<i64> {
    let (newest, older) = updates.split_first()?;
    let version = &newest.package.version;

    let mut time = newest.time;
    for update in older {
        if update.package.version != *version {
            break;
        }
        time = update.time;
    }

    Some(time.timestamp())
}
