//! The recipe manifest as seen by the changelog miner.
//!
//! Only `release` and `version` matter here; the rest of the recipe is the
//! business of the full recipe parser.

use serde::{Deserialize, Serialize};

use crate::error::ForgeError;
use crate::Result;

/// Snapshot of a recipe manifest at one tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub release: u32,
    pub version: String,
}

/// Parses manifest bytes. Any error means the tag contributes nothing.
pub trait ManifestParser {
    fn parse(&self, bytes: &[u8]) -> Result<PackageManifest>;
}

impl<F> ManifestParser for F
where
    F: Fn(&[u8]) -> Result<PackageManifest>,
{
    fn parse(&self, bytes: &[u8]) -> Result<PackageManifest> {
        self(bytes)
    }
}

/// Reads `release` and `version` from a YAML recipe such as `package.yml`.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlManifestParser;

#[derive(Deserialize)]
struct RawManifest {
    release: u32,
    version: serde_yaml::Value,
}

impl ManifestParser for YamlManifestParser {
    fn parse(&self, bytes: &[u8]) -> Result<PackageManifest> {
        let raw: RawManifest = serde_yaml::from_slice(bytes)?;

        // Unquoted versions such as `2.4` arrive as numbers.
        let version = match raw.version {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            other => {
                return Err(ForgeError::Manifest(format!(
                    "version must be a string, found {other:?}"
                )))
            }
        };

        if version.trim().is_empty() {
            return Err(ForgeError::Manifest("version is empty".to_string()));
        }

        Ok(PackageManifest {
            release: raw.release,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recipe() {
        let recipe = b"name       : nano\nversion    : '8.0'\nrelease    : 164\nsource     :\n    - https://www.nano-editor.org/dist/v8/nano-8.0.tar.xz : abc\n";
        let manifest = YamlManifestParser.parse(recipe).unwrap();
        assert_eq!(manifest.release, 164);
        assert_eq!(manifest.version, "8.0");
    }

    #[test]
    fn test_numeric_version_is_accepted() {
        let manifest = YamlManifestParser
            .parse(b"version: 2.4\nrelease: 3\n")
            .unwrap();
        assert_eq!(manifest.version, "2.4");
    }

    #[test]
    fn test_malformed_recipes_rejected() {
        assert!(YamlManifestParser.parse(b"name: nano\n").is_err());
        assert!(YamlManifestParser.parse(b"version: 1\nrelease: many\n").is_err());
        assert!(YamlManifestParser.parse(b"version: [1]\nrelease: 1\n").is_err());
        assert!(YamlManifestParser.parse(b"version: ''\nrelease: 1\n").is_err());
        assert!(YamlManifestParser.parse(b"\t: : not yaml").is_err());
    }

    #[test]
    fn test_closure_parser() {
        let parser = |_: &[u8]| -> Result<PackageManifest> {
            Ok(PackageManifest {
                release: 1,
                version: "1.0".to_string(),
            })
        };
        assert_eq!(parser.parse(b"anything").unwrap().release, 1);
    }
}
