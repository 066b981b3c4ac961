//! Release configuration.

use std::path::PathBuf;

use crate::srs::format::BINARY_EXTENSION;
use crate::{Error, Result};

/// Default path of the full database
pub const DEFAULT_OUTPUT: &str = "geoip.db";

/// Default path of the filtered database
pub const DEFAULT_FILTERED_OUTPUT: &str = "geoip-cn.db";

/// Default label kept in the filtered database
pub const DEFAULT_FILTERED_LABEL: &str = "cn";

/// Default rule-set directory
pub const DEFAULT_RULE_SET_DIR: &str = "rule-set";

/// Output locations and switches of one release run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseConfig {
    /// Full database, every label
    pub output: PathBuf,
    /// Filtered database
    pub filtered_output: PathBuf,
    /// Labels kept in the filtered database
    pub filtered_labels: Vec<String>,
    /// Directory of the per-label rule-sets; recreated on every run
    pub rule_set_dir: PathBuf,
    /// Extend an existing filtered database instead of replacing it
    pub append: bool,
    /// Also write JSON source rule-sets
    pub json: bool,
    /// Write `.sha256sum` files next to the databases
    pub checksums: bool,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT),
            filtered_output: PathBuf::from(DEFAULT_FILTERED_OUTPUT),
            filtered_labels: vec![DEFAULT_FILTERED_LABEL.to_string()],
            rule_set_dir: PathBuf::from(DEFAULT_RULE_SET_DIR),
            append: false,
            json: false,
            checksums: true,
        }
    }
}

impl ReleaseConfig {
    /// Path of the binary rule-set of `label`.
    pub fn rule_set_path(&self, label: &str) -> PathBuf {
        crate::srs::rule_set_path(&self.rule_set_dir, label, BINARY_EXTENSION)
    }

    /// Check the configuration before any output is touched.
    pub fn validate(&self) -> Result<()> {
        if self.output == self.filtered_output {
            return Err(Error::Config(format!(
                "full and filtered outputs are the same file: {}",
                self.output.display()
            )));
        }
        if self.filtered_labels.is_empty() {
            return Err(Error::Config("no label for the filtered database".to_string()));
        }
        for label in &self.filtered_labels {
            let valid = !label.is_empty()
                && label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
            if !valid {
                return Err(Error::Config(format!("invalid label: {:?}", label)));
            }
        }
        if self.rule_set_dir.as_os_str().is_empty() || self.rule_set_dir.parent().is_none() {
            return Err(Error::Config(format!(
                "refusing to use {:?} as rule-set directory",
                self.rule_set_dir
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReleaseConfig::default();
        assert_eq!(config.output, PathBuf::from("geoip.db"));
        assert_eq!(config.filtered_output, PathBuf::from("geoip-cn.db"));
        assert_eq!(config.filtered_labels, vec!["cn"]);
        assert_eq!(config.rule_set_path("jp"), PathBuf::from("rule-set/geoip-jp.srs"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_labels() {
        let mut config = ReleaseConfig::default();
        config.filtered_labels = vec!["CN".to_string()];
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.filtered_labels = vec!["../cn".to_string()];
        assert!(config.validate().is_err());

        config.filtered_labels.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_root_dir() {
        let mut config = ReleaseConfig::default();
        config.rule_set_dir = PathBuf::from("/");
        assert!(config.validate().is_err());

        config.rule_set_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_same_outputs() {
        let mut config = ReleaseConfig::default();
        config.filtered_output = config.output.clone();
        assert!(config.validate().is_err());
    }
}
