//! Thin runner around the git executable.
//!
//! Every repository operation in this crate goes through [`Git`], which runs
//! the configured git program in a fixed working directory and turns a
//! non-zero exit into [`ForgeError::Git`] carrying git's stderr verbatim.
//!
//! Builds run privileged while recipe repositories and mirrors may belong to
//! other users, so git's repository ownership check is disabled for every
//! invocation.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::trace;

use crate::error::ForgeError;
use crate::Result;

/// A git invocation context: which program, and which directory to run in.
#[derive(Debug, Clone)]
pub struct Git {
    program: String,
    dir: PathBuf,
    options: Vec<String>,
}

impl Git {
    pub fn new(program: &str, dir: impl Into<PathBuf>) -> Self {
        Git {
            program: program.to_string(),
            dir: dir.into(),
            options: Vec::new(),
        }
    }

    /// Extra `name=value` settings passed as `-c` to every invocation.
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.extend(options.into_iter().map(Into::into));
        self
    }

    /// Directory the commands run in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run git and return stdout as (lossy) UTF-8.
    pub fn run<I, S>(&self, step: &'static str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let stdout = self.run_bytes(step, args)?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    /// Run git and return raw stdout.
    pub fn run_bytes<I, S>(&self, step: &'static str, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.output(step, args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ForgeError::git(step, stderr.trim().to_string()));
        }

        Ok(output.stdout)
    }

    /// Run git and report only whether it exited successfully.
    pub fn succeeds<I, S>(&self, args: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.output("probe", args)
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn output<I, S>(&self, step: &'static str, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command.args(["-c", "safe.directory=*"]);
        for option in &self.options {
            command.arg("-c").arg(option);
        }
        command
            .args(args)
            .current_dir(&self.dir)
            .env("GIT_TERMINAL_PROMPT", "0");

        trace!(dir = %self.dir.display(), ?command, "running git");

        command
            .output()
            .map_err(|e| ForgeError::git(step, format!("failed to run {}: {e}", self.program)))
    }
}

/// Whether `s` is a full 40-character hexadecimal object id.
pub fn is_full_object_id(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}
