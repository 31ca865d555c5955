//! pkgforge - host-side source staging and changelog tooling
//!
//! ## Commands
//!
//! - `fetch`: clone or refresh a pinned git source and print its bind mount
//! - `bind`: print the bind mount for a git source without fetching
//! - `history`: mine a recipe repository's tags into `history.xml`
//! - `timestamp`: print the reproducible build timestamp of a recipe

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use pkgforge_core::{
    BindConfiguration, ForgeConfig, GitSource, PackageHistory, YamlManifestParser,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "pkgforge")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Source staging and changelog mining for sandboxed package builds", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and results
    #[arg(long, global = true)]
    json: bool,

    /// Root directory for git mirrors
    #[arg(long, global = true, env = "PKGFORGE_MIRROR_ROOT")]
    mirror_root: Option<PathBuf>,

    /// Extra git setting as name=value, passed to every git invocation
    #[arg(short = 'c', long = "git-option", global = true)]
    git_options: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone or refresh a git source at an exact revision
    Fetch {
        /// Repository URI
        uri: String,

        /// Branch, tag, or commit to check out
        #[arg(long = "ref")]
        git_ref: String,

        /// Source directory inside the sandbox
        #[arg(long, default_value = "/home/build/YPKG/sources")]
        sandbox_dir: PathBuf,
    },

    /// Show where a git source would be mirrored and mounted
    Bind {
        /// Repository URI
        uri: String,

        /// Branch, tag, or commit
        #[arg(long = "ref")]
        git_ref: String,

        /// Source directory inside the sandbox
        #[arg(long, default_value = "/home/build/YPKG/sources")]
        sandbox_dir: PathBuf,
    },

    /// Build the changelog from the tags of a recipe repository
    History {
        /// Path to the recipe manifest at the repository root
        #[arg(default_value = "package.yml")]
        manifest: PathBuf,

        /// Write history.xml here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the reproducible build timestamp for a recipe
    Timestamp {
        /// Path to the recipe manifest at the repository root
        #[arg(default_value = "package.yml")]
        manifest: PathBuf,
    },
}

#[derive(Serialize)]
struct SourceReport<'a> {
    identifier: String,
    commit: Option<String>,
    #[serde(flatten)]
    bind: &'a BindConfiguration,
}

#[derive(Serialize)]
struct TimestampReport {
    timestamp: i64,
    date: String,
    version: String,
    release: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    pkgforge_core::init_tracing(cli.json, level);

    let mut config = ForgeConfig::from_env();
    if let Some(root) = &cli.mirror_root {
        config = config.with_mirror_root(root);
    }
    for option in &cli.git_options {
        config = config.with_git_option(option);
    }

    match cli.command {
        Commands::Fetch {
            uri,
            git_ref,
            sandbox_dir,
        } => cmd_fetch(&config, &uri, &git_ref, &sandbox_dir, cli.json),
        Commands::Bind {
            uri,
            git_ref,
            sandbox_dir,
        } => cmd_bind(&config, &uri, &git_ref, &sandbox_dir, cli.json),
        Commands::History { manifest, output } => {
            cmd_history(&config, &manifest, output.as_deref())
        }
        Commands::Timestamp { manifest } => cmd_timestamp(&config, &manifest, cli.json),
    }
}

/// Fetch a git source and report its bind mount
fn cmd_fetch(
    config: &ForgeConfig,
    uri: &str,
    git_ref: &str,
    sandbox_dir: &Path,
    json: bool,
) -> Result<()> {
    let source = GitSource::with_config(uri, git_ref, config)
        .with_context(|| format!("Invalid git source {uri}"))?;

    source
        .fetch()
        .with_context(|| format!("Failed to fetch {}", source.identifier()))?;
    let commit = source.head().context("Failed to read mirror HEAD")?;
    info!(source = %source.identifier(), commit = %commit, "source ready");

    print_source(&source, Some(commit), sandbox_dir, json)
}

/// Report a git source's mirror and bind mount without touching the network
fn cmd_bind(
    config: &ForgeConfig,
    uri: &str,
    git_ref: &str,
    sandbox_dir: &Path,
    json: bool,
) -> Result<()> {
    let source = GitSource::with_config(uri, git_ref, config)
        .with_context(|| format!("Invalid git source {uri}"))?;

    print_source(&source, None, sandbox_dir, json)
}

fn print_source(
    source: &GitSource,
    commit: Option<String>,
    sandbox_dir: &Path,
    json: bool,
) -> Result<()> {
    let bind = source.bind_configuration(sandbox_dir);

    if json {
        let report = SourceReport {
            identifier: source.identifier(),
            commit,
            bind: &bind,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Source: {}", source.identifier());
    if let Some(commit) = commit {
        println!("Commit: {}", commit);
    }
    println!("Host path: {}", bind.host_path.display());
    println!("Guest path: {}", bind.guest_path.display());

    Ok(())
}

/// Mine the changelog and write history.xml
fn cmd_history(config: &ForgeConfig, manifest: &Path, output: Option<&Path>) -> Result<()> {
    let history = PackageHistory::mine(manifest, &YamlManifestParser, config)
        .with_context(|| format!("Failed to build history for {:?}", manifest))?;

    match output {
        Some(path) => {
            history
                .write_xml(path)
                .with_context(|| format!("Failed to write {:?}", path))?;
            info!(
                entries = history.updates().len(),
                path = %path.display(),
                "wrote changelog"
            );
        }
        None => print!("{}", history.to_xml()?),
    }

    Ok(())
}

/// Print the reproducible build timestamp
fn cmd_timestamp(config: &ForgeConfig, manifest: &Path, json: bool) -> Result<()> {
    let history = PackageHistory::mine(manifest, &YamlManifestParser, config)
        .with_context(|| format!("Failed to build history for {:?}", manifest))?;

    let timestamp = history.last_version_timestamp();
    let newest = history.newest();
    let date = DateTime::from_timestamp(timestamp, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    if json {
        let report = TimestampReport {
            timestamp,
            date,
            version: newest.package.version.clone(),
            release: newest.package.release,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", timestamp);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "pkgforge",
            "--mirror-root",
            "/srv/mirrors",
            "-c",
            "protocol.file.allow=always",
            "fetch",
            "https://github.com/getsolus/nano.git",
            "--ref",
            "v8.0",
        ])
        .unwrap();

        assert_eq!(cli.mirror_root, Some(PathBuf::from("/srv/mirrors")));
        assert_eq!(cli.git_options, ["protocol.file.allow=always"]);
        match cli.command {
            Commands::Fetch {
                uri,
                git_ref,
                sandbox_dir,
            } => {
                assert_eq!(uri, "https://github.com/getsolus/nano.git");
                assert_eq!(git_ref, "v8.0");
                assert_eq!(sandbox_dir, PathBuf::from("/home/build/YPKG/sources"));
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_history_defaults_to_package_yml() {
        let cli = Cli::try_parse_from(["pkgforge", "history", "-o", "history.xml"]).unwrap();
        match cli.command {
            Commands::History { manifest, output } => {
                assert_eq!(manifest, PathBuf::from("package.yml"));
                assert_eq!(output, Some(PathBuf::from("history.xml")));
            }
            _ => panic!("expected history"),
        }
    }

    #[test]
    fn test_source_report_flattens_bind() {
        let bind = BindConfiguration {
            host_path: PathBuf::from("/var/lib/pkgforge/sources/git/github.com/getsolus/nano.git"),
            guest_path: PathBuf::from("/home/build/YPKG/sources/nano.git"),
        };
        let report = SourceReport {
            identifier: "https://github.com/getsolus/nano.git#v8.0".to_string(),
            commit: None,
            bind: &bind,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["guest_path"], "/home/build/YPKG/sources/nano.git");
        assert!(value["commit"].is_null());
    }
}
