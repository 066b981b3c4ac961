//! sing-box rule-set emission.
//!
//! Binary rule-set layout:
//! ```text
//! +--------------------+
//! |  "SRS" + version   |  4 bytes, uncompressed
//! +--------------------+
//! |  ZLIB BODY         |  uvarint rule count, then each rule:
//! |                    |    type 0, items (0x06 = IP set), 0xFF, invert
//! +--------------------+
//! ```
//!
//! An IP set is a version byte, a big-endian u64 range count and each
//! range as two length-prefixed addresses.

use ipnet::IpNet;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub mod format;
mod reader;
mod writer;

pub use reader::read;
pub use writer::write;

use crate::{Error, Result};
use format::{BINARY_EXTENSION, FILE_PREFIX, SOURCE_EXTENSION, VERSION};

/// A source rule-set as sing-box reads it from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainRuleSet {
    pub version: u8,
    pub rules: Vec<HeadlessRule>,
}

impl Default for PlainRuleSet {
    fn default() -> Self {
        Self {
            version: VERSION,
            rules: Vec::new(),
        }
    }
}

impl PlainRuleSet {
    /// A rule-set with one default rule matching `ip_cidr`.
    pub fn from_cidrs(ip_cidr: Vec<String>) -> Self {
        Self {
            version: VERSION,
            rules: vec![HeadlessRule::Default(DefaultHeadlessRule {
                ip_cidr,
                invert: false,
            })],
        }
    }

    /// A rule-set with one default rule matching `networks`.
    pub fn from_networks(networks: &[IpNet]) -> Self {
        Self::from_cidrs(networks.iter().map(|net| net.to_string()).collect())
    }
}

/// A rule without outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeadlessRule {
    Default(DefaultHeadlessRule),
}

/// A default rule; only destination IP matching is modelled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultHeadlessRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_cidr: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub invert: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Path of the rule-set file of `label` with `extension`.
pub fn rule_set_path(dir: &Path, label: &str, extension: &str) -> PathBuf {
    dir.join(format!("{}{}.{}", FILE_PREFIX, label, extension))
}

/// Write `<dir>/geoip-<label>.srs` matching `networks`.
///
/// With `json` set, the source form is written next to it as
/// `geoip-<label>.json`. Returns the path of the binary file.
pub fn emit_rule_set(dir: &Path, label: &str, networks: &[IpNet], json: bool) -> Result<PathBuf> {
    let rule_set = PlainRuleSet::from_networks(networks);

    let path = rule_set_path(dir, label, BINARY_EXTENSION);
    let file = File::create(&path).map_err(Error::Write)?;
    write(BufWriter::new(file), &rule_set)?;
    info!("Wrote {} ({} networks)", path.display(), networks.len());

    if json {
        let source_path = rule_set_path(dir, label, SOURCE_EXTENSION);
        let content = serde_json::to_vec_pretty(&rule_set)
            .map_err(|e| Error::Config(format!("failed to encode {}: {}", label, e)))?;
        std::fs::write(&source_path, content).map_err(Error::Write)?;
        info!("Wrote {}", source_path.display());
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_json_shape() {
        let rule_set = PlainRuleSet::from_cidrs(vec!["1.2.3.0/24".to_string()]);
        let json = serde_json::to_string(&rule_set).unwrap();
        assert_eq!(json, r#"{"version":1,"rules":[{"ip_cidr":["1.2.3.0/24"]}]}"#);

        let parsed: PlainRuleSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rule_set);
    }

    #[test]
    fn test_emit_rule_set() {
        let dir = tempdir().unwrap();
        let networks: Vec<IpNet> = vec!["1.2.3.0/24".parse().unwrap(), "5.6.7.0/24".parse().unwrap()];

        let path = emit_rule_set(dir.path(), "jp", &networks, true).unwrap();
        assert_eq!(path, dir.path().join("geoip-jp.srs"));

        let decoded = read(File::open(&path).unwrap()).unwrap();
        assert_eq!(
            decoded,
            PlainRuleSet::from_cidrs(vec!["1.2.3.0/24".to_string(), "5.6.7.0/24".to_string()])
        );

        let source = std::fs::read_to_string(dir.path().join("geoip-jp.json")).unwrap();
        let source: PlainRuleSet = serde_json::from_str(&source).unwrap();
        assert_eq!(source, decoded);
    }

    #[test]
    fn test_emit_into_missing_dir_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let result = emit_rule_set(&missing, "jp", &[], false);
        assert!(matches!(result, Err(Error::Write(_))));
    }
}
