//! Grouping of source networks by label.

use ipnet::IpNet;
use log::{info, warn};
use std::collections::BTreeMap;

use crate::label::resolve_label;
use crate::source::CountryRecord;
use crate::Result;

/// Source networks grouped by label.
///
/// Networks keep their source order within each label. Networks whose
/// record has no usable label are dropped and counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelledNetworks {
    networks: BTreeMap<String, Vec<IpNet>>,
    skipped: usize,
}

impl LabelledNetworks {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve and group every `(network, record)` pair.
    ///
    /// Stops at the first error of the source walk.
    pub fn collect<I>(source: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<(IpNet, CountryRecord)>>,
    {
        let mut set = Self::new();
        for item in source {
            let (network, record) = item?;
            set.push(network, &record);
        }

        info!(
            "Collected {} networks under {} labels",
            set.network_count(),
            set.len()
        );
        if set.skipped > 0 {
            warn!("Skipped {} networks without country or continent", set.skipped);
        }
        Ok(set)
    }

    /// Add one source network.
    ///
    /// Returns `false` when the network was dropped.
    pub fn push(&mut self, network: IpNet, record: &CountryRecord) -> bool {
        match resolve_label(record) {
            Some(label) => {
                self.networks.entry(label).or_default().push(network);
                true
            }
            None => {
                self.skipped += 1;
                false
            }
        }
    }

    /// Labels in sorted order.
    pub fn labels(&self) -> Vec<String> {
        self.networks.keys().cloned().collect()
    }

    /// Networks of one label.
    pub fn get(&self, label: &str) -> Option<&[IpNet]> {
        self.networks.get(label).map(Vec::as_slice)
    }

    /// Iterate `(label, networks)` in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[IpNet])> {
        self.networks
            .iter()
            .map(|(label, nets)| (label.as_str(), nets.as_slice()))
    }

    /// Total number of labelled networks.
    pub fn network_count(&self) -> usize {
        self.networks.values().map(Vec::len).sum()
    }

    /// Number of dropped networks.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Whether no network was labelled.
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn record(country: &str, continent: &str) -> CountryRecord {
        CountryRecord {
            country: Some(country.to_string()),
            continent: Some(continent.to_string()),
        }
    }

    fn source() -> Vec<Result<(IpNet, CountryRecord)>> {
        vec![
            Ok(("1.0.1.0/24".parse().unwrap(), record("CN", "AS"))),
            Ok(("1.2.3.0/24".parse().unwrap(), record("JP", "AS"))),
            Ok(("10.0.0.0/8".parse().unwrap(), record("", ""))),
            Ok(("2400:cb00::/32".parse().unwrap(), record("", "EU"))),
            Ok(("1.0.2.0/23".parse().unwrap(), record("cn", "AS"))),
        ]
    }

    #[test]
    fn test_networks_are_placed_under_their_label() {
        let set = LabelledNetworks::collect(source()).unwrap();

        assert_eq!(set.labels(), vec!["cn", "eu", "jp"]);
        let cn: Vec<String> = set.get("cn").unwrap().iter().map(|n| n.to_string()).collect();
        assert_eq!(cn, vec!["1.0.1.0/24", "1.0.2.0/23"]);
        assert_eq!(
            set.get("eu").unwrap(),
            &["2400:cb00::/32".parse::<IpNet>().unwrap()]
        );
        assert!(set.get("us").is_none());
    }

    #[test]
    fn test_counts_add_up() {
        let input = source();
        let total = input.len();
        let set = LabelledNetworks::collect(input).unwrap();

        assert_eq!(set.skipped(), 1);
        assert_eq!(set.network_count() + set.skipped(), total);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_first_error_is_returned() {
        let mut input = source();
        input.insert(1, Err(Error::MalformedSource("bad record".to_string())));

        let result = LabelledNetworks::collect(input);
        assert!(matches!(result, Err(Error::MalformedSource(_))));
    }

    #[test]
    fn test_push_reports_kept() {
        let mut set = LabelledNetworks::new();
        let net: IpNet = "5.6.7.0/24".parse().unwrap();

        assert!(set.push(net, &record("JP", "AS")));
        assert!(!set.push(net, &CountryRecord::default()));
        assert_eq!(set.labels(), vec!["jp"]);
        assert_eq!(set.skipped(), 1);
        assert_eq!(set.iter().count(), 1);
    }
}
