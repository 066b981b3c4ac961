//! Source database decoding.
//!
//! Opens a MaxMind DB image and walks every network it stores, once.
//! IPv4 networks are reported as IPv4 prefixes by the IPv4 walk. The IPv6
//! walk drops everything under the IPv4 subtree (`::/96`) along with any
//! IPv6 range aliased onto it.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use maxminddb::Reader;
use serde::Deserialize;
use std::fmt::Display;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::Arc;

use crate::mmdb::format::{read_record, Prefix, IPV4_ALIASES, IPV4_SUBTREE};
use crate::mmdb::Metadata;
use crate::{Error, Result};

/// Country record of the ipinfo free country database.
///
/// Only the codes are read; `country_name` and `continent_name` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CountryRecord {
    /// ISO 3166-1 alpha-2 country code
    #[serde(default)]
    pub country: Option<String>,
    /// Two-letter continent code
    #[serde(default)]
    pub continent: Option<String>,
}

/// An opened source database.
pub struct SourceDatabase {
    data: Arc<[u8]>,
    reader: Reader<Arc<[u8]>>,
    metadata: Metadata,
}

impl SourceDatabase {
    /// Open a database image held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let metadata = Metadata::parse(&bytes)?;
        let data: Arc<[u8]> = bytes.into();
        let reader = Reader::from_source(Arc::clone(&data)).map_err(malformed)?;

        Ok(Self {
            data,
            reader,
            metadata,
        })
    }

    /// Read and open a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(bytes)
    }

    /// Get the database metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Iterate every stored network with its record.
    ///
    /// Records that fail to decode end the walk with
    /// [`Error::MalformedSource`].
    pub fn networks<'de, T>(&'de self) -> Result<Networks<'de, T>>
    where
        T: Deserialize<'de> + 'de,
    {
        let v4 = walk::<T>(
            &self.reader,
            IpNetwork::V4(Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).map_err(malformed)?),
        )?;
        if self.metadata.ip_version != 6 {
            return Ok(Networks { inner: v4 });
        }

        let mut skipped = vec![IPV4_SUBTREE];
        skipped.extend(self.aliased_prefixes());
        for prefix in &skipped[1..] {
            log::debug!("skipping aliased subtree {:?}", prefix);
        }

        let v6 = walk::<T>(
            &self.reader,
            IpNetwork::V6(Ipv6Network::new(Ipv6Addr::UNSPECIFIED, 0).map_err(malformed)?),
        )?
        .filter(move |item| match item {
            // maxminddb reports prefixes under ::/96 as IPv4; the v4 walk already has them
            Ok((IpNet::V4(_), _)) => false,
            Ok((IpNet::V6(net), _)) => {
                let prefix = Prefix::new(u128::from(net.network()), net.prefix_len());
                !skipped.iter().any(|s| s.contains(&prefix))
            }
            Err(_) => true,
        });

        Ok(Networks {
            inner: Box::new(v4.chain(v6)),
        })
    }

    /// Alias prefixes whose record points at the IPv4 subtree node.
    fn aliased_prefixes(&self) -> Vec<Prefix> {
        let ipv4_start = match self.follow(IPV4_SUBTREE) {
            Some(node) if node < self.metadata.node_count => node,
            _ => return Vec::new(),
        };

        IPV4_ALIASES
            .iter()
            .filter(|alias| self.follow(**alias) == Some(ipv4_start))
            .copied()
            .collect()
    }

    /// Follow `prefix` from the root and return the record reached.
    fn follow(&self, prefix: Prefix) -> Option<u32> {
        let mut node = 0u32;
        for depth in 0..prefix.len {
            if node >= self.metadata.node_count {
                return None;
            }
            node = read_record(&self.data, self.metadata.record_size, node, prefix.bit(depth))?;
        }
        Some(node)
    }
}

/// Iterator over `(network, record)` pairs of a source database.
pub struct Networks<'de, T> {
    inner: Box<dyn Iterator<Item = Result<(IpNet, T)>> + 'de>,
}

impl<'de, T> Iterator for Networks<'de, T> {
    type Item = Result<(IpNet, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

fn walk<'de, T>(
    reader: &'de Reader<Arc<[u8]>>,
    cidr: IpNetwork,
) -> Result<Box<dyn Iterator<Item = Result<(IpNet, T)>> + 'de>>
where
    T: Deserialize<'de> + 'de,
{
    let within = reader.within::<T>(cidr).map_err(malformed)?;
    Ok(Box::new(within.map(|item| {
        let item = item.map_err(malformed)?;
        Ok((to_ipnet(item.ip_net)?, item.info))
    })))
}

fn to_ipnet(network: IpNetwork) -> Result<IpNet> {
    let net = match network {
        IpNetwork::V4(n) => IpNet::V4(Ipv4Net::new(n.network(), n.prefix()).map_err(malformed)?),
        IpNetwork::V6(n) => IpNet::V6(Ipv6Net::new(n.network(), n.prefix()).map_err(malformed)?),
    };
    Ok(net)
}

fn malformed(e: impl Display) -> Error {
    Error::MalformedSource(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmdb::{Tree, TreeFlags, TreeOptions, Value};
    use std::collections::BTreeMap;

    fn record(country: &str, continent: &str) -> Value {
        let mut map = BTreeMap::new();
        if !country.is_empty() {
            map.insert("country".to_string(), Value::from(country));
        }
        if !continent.is_empty() {
            map.insert("continent".to_string(), Value::from(continent));
        }
        Value::Map(map)
    }

    fn source_image(flags: TreeFlags, entries: &[(&str, &str, &str)]) -> Vec<u8> {
        let mut tree = Tree::new(TreeOptions {
            database_type: "ipinfo country.mmdb".to_string(),
            ip_version: 6,
            record_size: 32,
            flags: flags | TreeFlags::INCLUDE_RESERVED_NETWORKS,
            ..TreeOptions::default()
        })
        .unwrap();
        for (net, country, continent) in entries {
            tree.insert(net.parse().unwrap(), record(country, continent))
                .unwrap();
        }
        tree.to_bytes().unwrap()
    }

    fn collect(db: &SourceDatabase) -> Vec<(String, CountryRecord)> {
        db.networks::<CountryRecord>()
            .unwrap()
            .map(|item| item.map(|(net, rec)| (net.to_string(), rec)))
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_garbage_is_malformed() {
        let result = SourceDatabase::from_bytes(b"definitely not a database".to_vec());
        assert!(matches!(result, Err(Error::MalformedSource(_))));
    }

    #[test]
    fn test_truncated_image_is_malformed() {
        let image = source_image(TreeFlags::empty(), &[("1.0.0.0/24", "AU", "OC")]);
        // keep only the metadata: the tree and data section are gone
        let marker = image
            .windows(crate::mmdb::METADATA_MARKER.len())
            .rposition(|w| w == crate::mmdb::METADATA_MARKER)
            .unwrap();
        let truncated = image[marker..].to_vec();

        assert!(SourceDatabase::from_bytes(truncated).is_err());

        let cut = image[..image.len() - 3].to_vec();
        assert!(matches!(
            SourceDatabase::from_bytes(cut),
            Err(Error::MalformedSource(_))
        ));
    }

    #[test]
    fn test_metadata_is_read() {
        let image = source_image(TreeFlags::empty(), &[("1.0.0.0/24", "AU", "OC")]);
        let db = SourceDatabase::from_bytes(image).unwrap();

        assert_eq!(db.metadata().database_type, "ipinfo country.mmdb");
        assert_eq!(db.metadata().ip_version, 6);
        assert_eq!(db.metadata().record_size, 32);
    }

    #[test]
    fn test_aliased_source_yields_each_network_once() {
        let image = source_image(
            TreeFlags::empty(),
            &[
                ("1.0.0.0/24", "AU", "OC"),
                ("8.8.8.0/24", "US", "NA"),
                ("2400:cb00::/32", "US", "NA"),
            ],
        );
        let db = SourceDatabase::from_bytes(image).unwrap();
        let networks = collect(&db);
        let names: Vec<&str> = networks.iter().map(|(n, _)| n.as_str()).collect();

        assert_eq!(names, vec!["1.0.0.0/24", "8.8.8.0/24", "2400:cb00::/32"]);
        assert_eq!(networks[0].1.country.as_deref(), Some("AU"));
        assert_eq!(networks[0].1.continent.as_deref(), Some("OC"));
    }

    #[test]
    fn test_unaliased_source_keeps_6to4_data() {
        let image = source_image(
            TreeFlags::DISABLE_IPV4_ALIASING,
            &[("1.0.0.0/24", "AU", "OC"), ("2002::/16", "", "EU")],
        );
        let db = SourceDatabase::from_bytes(image).unwrap();
        let names: Vec<String> = collect(&db).into_iter().map(|(n, _)| n).collect();

        assert_eq!(names, vec!["1.0.0.0/24".to_string(), "2002::/16".to_string()]);
    }

    #[test]
    fn test_missing_fields_decode_as_none() {
        let image = source_image(TreeFlags::empty(), &[("9.9.9.0/24", "", "")]);
        let db = SourceDatabase::from_bytes(image).unwrap();
        let networks = collect(&db);

        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].1, CountryRecord::default());
    }

    #[test]
    fn test_label_tree_yields_each_network_once() {
        let mut tree = Tree::new(TreeOptions {
            database_type: crate::mmdb::GEOIP_DATABASE_TYPE.to_string(),
            languages: vec!["cn".to_string()],
            ip_version: 6,
            record_size: 24,
            flags: TreeFlags::DISABLE_IPV4_ALIASING | TreeFlags::INCLUDE_RESERVED_NETWORKS,
            ..TreeOptions::default()
        })
        .unwrap();
        tree.insert("1.0.1.0/24".parse().unwrap(), Value::from("cn"))
            .unwrap();
        tree.insert("240e::/20".parse().unwrap(), Value::from("cn"))
            .unwrap();

        let db = SourceDatabase::from_bytes(tree.to_bytes().unwrap()).unwrap();
        let networks: Vec<(String, String)> = db
            .networks::<String>()
            .unwrap()
            .map(|item| item.map(|(net, label)| (net.to_string(), label)))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(
            networks,
            vec![
                ("1.0.1.0/24".to_string(), "cn".to_string()),
                ("240e::/20".to_string(), "cn".to_string()),
            ]
        );
    }
}
