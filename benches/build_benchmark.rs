//! Benchmarks for trie building and rule-set encoding.
//!
//! Run with: cargo bench
//!
//! This benchmark suite measures:
//! - Trie insertion and serialization with different network counts
//! - Binary rule-set encoding of one label's networks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use sing_geoip::mmdb::{Metadata, Tree, TreeOptions, Value};
use sing_geoip::srs::{self, PlainRuleSet};
use std::net::{Ipv4Addr, Ipv6Addr};

const LABELS: [&str; 8] = ["cn", "us", "jp", "de", "gb", "fr", "hk", "eu"];

/// Generate disjoint networks: /24s spread over IPv4 and /32s over IPv6.
fn generate_networks(count: usize) -> Vec<(IpNet, &'static str)> {
    (0..count)
        .map(|i| {
            let label = LABELS[i % LABELS.len()];
            let net = if i % 4 == 3 {
                let addr = Ipv6Addr::from(0x2400_0000_0000_0000_0000_0000_0000_0000u128 + ((i as u128) << 96));
                IpNet::V6(Ipv6Net::new(addr, 32).unwrap())
            } else {
                let addr = Ipv4Addr::from(0x0100_0000u32 + ((i as u32) << 8));
                IpNet::V4(Ipv4Net::new(addr, 24).unwrap())
            };
            (net, label)
        })
        .collect()
}

fn geoip_options() -> TreeOptions {
    let metadata = Metadata {
        ip_version: 6,
        record_size: 28,
        ..Metadata::default()
    };
    let labels: Vec<String> = LABELS.iter().map(|l| l.to_string()).collect();
    TreeOptions::geoip(&metadata, &labels)
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_build");

    for count in [1_000, 10_000, 50_000] {
        let networks = generate_networks(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &networks, |b, networks| {
            b.iter(|| {
                let mut tree = Tree::new(geoip_options()).unwrap();
                for (net, label) in networks {
                    tree.insert(*net, Value::from(*label)).unwrap();
                }
                black_box(tree.to_bytes().unwrap())
            })
        });
    }

    group.finish();
}

fn bench_rule_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_set_write");

    for count in [1_000, 10_000] {
        let networks: Vec<IpNet> = generate_networks(count).into_iter().map(|(n, _)| n).collect();
        let rule_set = PlainRuleSet::from_networks(&networks);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &rule_set, |b, rule_set| {
            b.iter(|| {
                let mut out = Vec::new();
                srs::write(&mut out, black_box(rule_set)).unwrap();
                out
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_rule_set);
criterion_main!(benches);
