//! In-memory search tree under construction.

use ahash::AHashMap;
use bitflags::bitflags;
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use super::format::*;
use super::{Metadata, Value};
use crate::source::SourceDatabase;
use crate::{Error, Result};

bitflags! {
    /// Tree construction flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TreeFlags: u8 {
        /// Keep IPv4 and IPv6 address spaces apart (no `::ffff:0:0/96`,
        /// `2001::/32` or `2002::/16` aliases onto the IPv4 subtree).
        const DISABLE_IPV4_ALIASING = 0b00000001;
        /// Accept networks inside reserved and private ranges.
        const INCLUDE_RESERVED_NETWORKS = 0b00000010;
    }
}

/// What happens when an inserted network overlaps stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertPolicy {
    /// The new value replaces everything under the inserted prefix.
    #[default]
    Replace,
    /// Only the empty parts of the inserted prefix receive the new value.
    KeepExisting,
}

/// Options for a new tree.
#[derive(Debug, Clone)]
pub struct TreeOptions {
    pub database_type: String,
    pub languages: Vec<String>,
    pub description: BTreeMap<String, String>,
    pub ip_version: u16,
    pub record_size: u16,
    pub build_epoch: u64,
    pub insert_policy: InsertPolicy,
    pub flags: TreeFlags,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            database_type: String::new(),
            languages: Vec::new(),
            description: BTreeMap::new(),
            ip_version: 6,
            record_size: 28,
            build_epoch: 0,
            insert_policy: InsertPolicy::Replace,
            flags: TreeFlags::empty(),
        }
    }
}

impl TreeOptions {
    /// Options for a `sing-geoip` tree derived from a source database.
    ///
    /// Values are replaced on overlap, IPv4 is not aliased into IPv6 and
    /// reserved networks are kept.
    pub fn geoip(source: &Metadata, labels: &[String]) -> Self {
        Self {
            database_type: GEOIP_DATABASE_TYPE.to_string(),
            languages: labels.to_vec(),
            description: BTreeMap::new(),
            ip_version: source.ip_version,
            record_size: source.record_size,
            build_epoch: source.build_epoch,
            insert_policy: InsertPolicy::Replace,
            flags: TreeFlags::DISABLE_IPV4_ALIASING | TreeFlags::INCLUDE_RESERVED_NETWORKS,
        }
    }
}

/// One record of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Record {
    Empty,
    Node(usize),
    Data(u32),
    /// Points at the IPv4 subtree when written.
    Alias,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct Node {
    pub(super) children: [Record; 2],
}

/// A binary search tree mapping networks to data section values.
///
/// # Examples
/// ```
/// use sing_geoip::mmdb::{Tree, TreeOptions, Value};
///
/// let mut tree = Tree::new(TreeOptions::default()).unwrap();
/// tree.insert("1.2.3.0/24".parse().unwrap(), Value::from("jp")).unwrap();
///
/// let value = tree.lookup("1.2.3.4".parse().unwrap());
/// assert_eq!(value.and_then(Value::as_str), Some("jp"));
/// ```
pub struct Tree {
    pub(super) options: TreeOptions,
    pub(super) nodes: Vec<Node>,
    pub(super) values: Vec<Value>,
    value_ids: AHashMap<Value, u32>,
    reserved: Vec<Prefix>,
}

impl Tree {
    /// Create an empty tree.
    pub fn new(options: TreeOptions) -> Result<Self> {
        if options.ip_version != 4 && options.ip_version != 6 {
            return Err(Error::Config(format!(
                "unsupported IP version: {}",
                options.ip_version
            )));
        }
        if !RECORD_SIZES.contains(&options.record_size) {
            return Err(Error::Config(format!(
                "unsupported record size: {}",
                options.record_size
            )));
        }

        let mut reserved: Vec<Prefix> = RESERVED_V4
            .iter()
            .map(|(network, len)| {
                if options.ip_version == 4 {
                    Prefix::new((*network as u128) << 96, *len)
                } else {
                    Prefix::new(*network as u128, *len + 96)
                }
            })
            .collect();
        if options.ip_version == 6 {
            reserved.extend_from_slice(&RESERVED_V6);
        }

        let mut tree = Self {
            options,
            nodes: vec![Node {
                children: [Record::Empty; 2],
            }],
            values: Vec::new(),
            value_ids: AHashMap::new(),
            reserved,
        };
        if tree.aliased() {
            tree.install_aliases();
        }
        Ok(tree)
    }

    /// Re-open a tree previously written by this crate and extend its
    /// label vocabulary with `labels`.
    ///
    /// The file is read completely before the tree is returned, so the
    /// same path may be overwritten afterwards.
    pub fn load(path: impl AsRef<Path>, labels: &[String]) -> Result<Self> {
        let path = path.as_ref();
        let source = SourceDatabase::open(path)?;
        let metadata = source.metadata();
        if metadata.database_type != GEOIP_DATABASE_TYPE {
            return Err(Error::ForeignDatabase(metadata.database_type.clone()));
        }

        let mut languages = metadata.languages.clone();
        for label in labels {
            if !languages.contains(label) {
                languages.push(label.clone());
            }
        }

        let mut tree = Tree::new(TreeOptions::geoip(metadata, &languages))?;
        let mut count = 0usize;
        for item in source.networks::<String>()? {
            let (network, label) = item?;
            tree.insert(network, Value::String(label))?;
            count += 1;
        }

        log::info!("loaded {} networks from {}", count, path.display());
        Ok(tree)
    }

    /// Get the tree options.
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// Insert a network, applying the configured insert policy on overlap.
    pub fn insert(&mut self, network: IpNet, value: Value) -> Result<()> {
        let key = self.key(&network)?;

        if !self
            .options
            .flags
            .contains(TreeFlags::INCLUDE_RESERVED_NETWORKS)
            && self.reserved.iter().any(|r| r.contains(&key))
        {
            log::debug!("skipping reserved network {}", network);
            return Ok(());
        }

        let aliased = self.aliased();
        if aliased && IPV4_ALIASES.iter().any(|alias| alias.contains(&key)) {
            return Err(Error::Insertion(format!(
                "network {} is inside an IPv4 alias",
                network
            )));
        }

        let id = self.intern(value);
        if key.len == 0 {
            self.set_record(0, 0, id);
            self.set_record(0, 1, id);
        } else {
            self.descend(0, 0, key, id);
        }

        if aliased && IPV4_ALIASES.iter().any(|alias| key.contains(alias)) {
            self.install_aliases();
        }
        Ok(())
    }

    /// Look up the value stored for an address.
    pub fn lookup(&self, ip: IpAddr) -> Option<&Value> {
        let key = match (ip, self.options.ip_version) {
            (IpAddr::V4(v4), 4) => Prefix::new((u32::from(v4) as u128) << 96, 32),
            (IpAddr::V4(v4), _) => Prefix::new(u32::from(v4) as u128, 128),
            (IpAddr::V6(v6), 6) => Prefix::new(u128::from(v6), 128),
            (IpAddr::V6(_), _) => return None,
        };

        let mut node = 0;
        for depth in 0..key.len {
            let mut record = self.nodes[node].children[key.bit(depth)];
            if record == Record::Alias {
                record = self.ipv4_start();
            }
            match record {
                Record::Node(next) => node = next,
                Record::Data(id) => return self.values.get(id as usize),
                Record::Empty | Record::Alias => return None,
            }
        }
        None
    }

    /// Whether alias records are maintained in this tree.
    pub(super) fn aliased(&self) -> bool {
        self.options.ip_version == 6
            && !self
                .options
                .flags
                .contains(TreeFlags::DISABLE_IPV4_ALIASING)
    }

    /// Record reached by following `::/96` from the root.
    pub(super) fn ipv4_start(&self) -> Record {
        let mut record = Record::Node(0);
        for _ in 0..IPV4_SUBTREE.len {
            match record {
                Record::Node(node) => record = self.nodes[node].children[0],
                _ => break,
            }
        }
        record
    }

    fn key(&self, network: &IpNet) -> Result<Prefix> {
        match (network, self.options.ip_version) {
            (IpNet::V4(net), 4) => Ok(Prefix::new(
                (u32::from(net.network()) as u128) << 96,
                net.prefix_len(),
            )),
            (IpNet::V4(net), _) => Ok(Prefix::new(
                u32::from(net.network()) as u128,
                net.prefix_len() + 96,
            )),
            (IpNet::V6(net), 6) => Ok(Prefix::new(u128::from(net.network()), net.prefix_len())),
            (IpNet::V6(_), _) => Err(Error::Insertion(format!(
                "cannot insert IPv6 network {} into an IPv4 database",
                network
            ))),
        }
    }

    fn intern(&mut self, value: Value) -> u32 {
        if let Some(id) = self.value_ids.get(&value) {
            return *id;
        }
        let id = self.values.len() as u32;
        self.values.push(value.clone());
        self.value_ids.insert(value, id);
        id
    }

    fn push_node(&mut self, record: Record) -> usize {
        self.nodes.push(Node {
            children: [record; 2],
        });
        self.nodes.len() - 1
    }

    /// Child node of `node` at `bit`, splitting a leaf record if needed.
    fn split(&mut self, node: usize, bit: usize) -> Option<usize> {
        match self.nodes[node].children[bit] {
            Record::Node(child) => Some(child),
            Record::Alias => None,
            record => {
                let child = self.push_node(record);
                self.nodes[node].children[bit] = Record::Node(child);
                Some(child)
            }
        }
    }

    fn descend(&mut self, node: usize, depth: u8, key: Prefix, id: u32) {
        let bit = key.bit(depth);
        if depth + 1 == key.len {
            self.set_record(node, bit, id);
        } else if let Some(child) = self.split(node, bit) {
            self.descend(child, depth + 1, key, id);
        }
        self.collapse(node, bit);
    }

    fn set_record(&mut self, node: usize, bit: usize, id: u32) {
        let record = self.nodes[node].children[bit];
        match (self.options.insert_policy, record) {
            (_, Record::Alias) => {}
            (InsertPolicy::Replace, _) | (InsertPolicy::KeepExisting, Record::Empty) => {
                self.nodes[node].children[bit] = Record::Data(id);
            }
            (InsertPolicy::KeepExisting, Record::Node(child)) => self.fill_empty(child, id),
            (InsertPolicy::KeepExisting, Record::Data(_)) => {}
        }
    }

    fn fill_empty(&mut self, node: usize, id: u32) {
        for bit in 0..2 {
            match self.nodes[node].children[bit] {
                Record::Empty => self.nodes[node].children[bit] = Record::Data(id),
                Record::Node(child) => {
                    self.fill_empty(child, id);
                    self.collapse(node, bit);
                }
                Record::Data(_) | Record::Alias => {}
            }
        }
    }

    /// Replace a child node whose two records are equal leaves by that leaf.
    fn collapse(&mut self, node: usize, bit: usize) {
        if let Record::Node(child) = self.nodes[node].children[bit] {
            let [left, right] = self.nodes[child].children;
            if left == right && matches!(left, Record::Empty | Record::Data(_)) {
                self.nodes[node].children[bit] = left;
            }
        }
    }

    fn install_aliases(&mut self) {
        for alias in IPV4_ALIASES {
            let mut node = 0;
            for depth in 0..alias.len - 1 {
                match self.split(node, alias.bit(depth)) {
                    Some(child) => node = child,
                    None => break,
                }
            }
            self.nodes[node].children[alias.bit(alias.len - 1)] = Record::Alias;
        }
    }
}
