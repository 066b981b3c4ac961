//! Error types for sing-geoip.

use thiserror::Error;

/// Error type for sing-geoip operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Source database download failed
    #[error("download error: {0}")]
    Fetch(#[from] reqwest::Error),

    /// Source database cannot be parsed
    #[error("malformed source database: {0}")]
    MalformedSource(String),

    /// Existing output database was not produced by this tool
    #[error("invalid sing-geoip database: database type is {0:?}")]
    ForeignDatabase(String),

    /// Network cannot be stored in the trie
    #[error("insertion error: {0}")]
    Insertion(String),

    /// Output sink failure
    #[error("write error: {0}")]
    Write(#[source] std::io::Error),

    /// Invalid CIDR pattern
    #[error("invalid CIDR pattern: {0}")]
    InvalidCidrPattern(String),

    /// Rule-set file cannot be decoded
    #[error("invalid rule-set: {0}")]
    InvalidRuleSet(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for sing-geoip operations.
pub type Result<T> = std::result::Result<T, Error>;
