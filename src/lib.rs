//! sing-geoip - GeoIP databases and rule-sets for sing-box.
//!
//! This crate transcodes the ipinfo free country database (a MaxMind DB)
//! into the files sing-box consumes:
//!
//! - `geoip.db`: a `sing-geoip` MMDB mapping every network to a lowercase
//!   country (or continent) label
//! - `geoip-cn.db`: the same database restricted to `cn`
//! - `rule-set/geoip-<label>.srs`: one binary rule-set per label
//!
//! # Quick Start
//!
//! ```ignore
//! use sing_geoip::config::ReleaseConfig;
//! use sing_geoip::fetch::Downloader;
//! use sing_geoip::release::release;
//!
//! let image = Downloader::new(token)?.download()?;
//! let summary = release(&ReleaseConfig::default(), image)?;
//! println!("{} rule-sets", summary.rule_sets.len());
//! ```
//!
//! # Pipeline
//!
//! 1. [`source`] walks every network of the source database
//! 2. [`label`] picks the country code, falling back to the continent
//! 3. [`aggregate`] groups networks by label
//! 4. [`mmdb`] builds and serializes the search trees
//! 5. [`srs`] writes the per-label rule-sets

mod error;

pub mod aggregate;
pub mod config;
pub mod fetch;
pub mod label;
pub mod mmdb;
pub mod release;
pub mod source;
pub mod srs;

// Re-export core types
pub use error::{Error, Result};

pub use aggregate::LabelledNetworks;
pub use config::ReleaseConfig;
pub use release::{release, ReleaseSummary};
pub use source::{CountryRecord, SourceDatabase};
