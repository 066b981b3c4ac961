//! MaxMind DB trie builder and serializer.
//!
//! The output follows the MaxMind DB 2.0 layout so that any MMDB reader
//! (sing-box included) can open it.
//!
//! # File Structure
//!
//! ```text
//! +---------------------+
//! |    SEARCH TREE      |  node_count * record_size / 4 bytes
//! +---------------------+
//! |  16 ZERO BYTES      |
//! +---------------------+
//! |   DATA SECTION      |  one encoded value per distinct record
//! +---------------------+
//! | "\xAB\xCD\xEFMaxMind.com"
//! +---------------------+
//! |   METADATA MAP      |
//! +---------------------+
//! ```

use std::collections::BTreeMap;

use crate::{Error, Result};

pub mod data;
pub mod format;
mod tree;
mod writer;


pub use data::Value;
pub use format::{GEOIP_DATABASE_TYPE, METADATA_MARKER};
pub use tree::{InsertPolicy, Tree, TreeFlags, TreeOptions};

/// The metadata marker is searched for in this many trailing bytes.
const METADATA_SEARCH_WINDOW: usize = 128 * 1024;

/// Database-level metadata of an MMDB image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    /// Database type tag
    pub database_type: String,
    /// 4 or 6
    pub ip_version: u16,
    /// Bits per search tree record (24, 28 or 32)
    pub record_size: u16,
    /// Number of search tree nodes
    pub node_count: u32,
    /// Label vocabulary
    pub languages: Vec<String>,
    /// Description by language
    pub description: BTreeMap<String, String>,
    /// Build time in seconds since the Unix epoch
    pub build_epoch: u64,
}

impl Metadata {
    /// Locate and decode the metadata map of an MMDB image.
    ///
    /// Also checks that the search tree fits in front of the metadata, so
    /// a truncated image is rejected before any node is read.
    pub fn parse(image: &[u8]) -> Result<Self> {
        let start = find_metadata(image).ok_or_else(|| {
            Error::MalformedSource("metadata marker not found".to_string())
        })?;
        let (value, _) = Value::decode(image, start)?;
        let Value::Map(map) = value else {
            return Err(Error::MalformedSource("metadata is not a map".to_string()));
        };

        let uint = |key: &str| -> Result<u64> {
            match map.get(key) {
                Some(Value::Uint16(v)) => Ok(*v as u64),
                Some(Value::Uint32(v)) => Ok(*v as u64),
                Some(Value::Uint64(v)) => Ok(*v),
                _ => Err(Error::MalformedSource(format!("metadata lacks {}", key))),
            }
        };

        let database_type = map
            .get("database_type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MalformedSource("metadata lacks database_type".to_string()))?
            .to_string();
        let languages = match map.get("languages") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        let description = match map.get("description") {
            Some(Value::Map(entries)) => entries
                .iter()
                .filter_map(|(lang, text)| Some((lang.clone(), text.as_str()?.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        };

        let metadata = Self {
            database_type,
            ip_version: uint("ip_version")? as u16,
            record_size: uint("record_size")? as u16,
            node_count: u32::try_from(uint("node_count")?)
                .map_err(|_| Error::MalformedSource("node_count out of range".to_string()))?,
            languages,
            description,
            build_epoch: uint("build_epoch").unwrap_or_default(),
        };

        if metadata.ip_version != 4 && metadata.ip_version != 6 {
            return Err(Error::MalformedSource(format!(
                "unsupported ip_version {}",
                metadata.ip_version
            )));
        }
        if !format::RECORD_SIZES.contains(&metadata.record_size) {
            return Err(Error::MalformedSource(format!(
                "unsupported record_size {}",
                metadata.record_size
            )));
        }

        let tree_size = metadata.node_count as usize * format::node_size(metadata.record_size);
        let available = start - METADATA_MARKER.len();
        if tree_size + format::DATA_SECTION_SEPARATOR_SIZE > available {
            return Err(Error::MalformedSource(format!(
                "search tree needs {} bytes, image has {}",
                tree_size + format::DATA_SECTION_SEPARATOR_SIZE,
                available
            )));
        }

        Ok(metadata)
    }
}

/// Offset just past the last metadata marker.
fn find_metadata(image: &[u8]) -> Option<usize> {
    let from = image.len().saturating_sub(METADATA_SEARCH_WINDOW);
    image[from..]
        .windows(METADATA_MARKER.len())
        .rposition(|w| w == METADATA_MARKER)
        .map(|pos| from + pos + METADATA_MARKER.len())
}
