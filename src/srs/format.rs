//! Binary rule-set constants, varints and IP range sets.

use ipnet::{IpNet, Ipv4Net, Ipv4Subnets, Ipv6Net, Ipv6Subnets};
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::{Error, Result};

/// Magic bytes at the start of every binary rule-set
pub const MAGIC: [u8; 3] = *b"SRS";

/// Binary rule-set version written by this crate
pub const VERSION: u8 = 1;

/// Version byte of an encoded IP set
pub const IP_SET_VERSION: u8 = 1;

/// Rule type byte of a default rule
pub const RULE_TYPE_DEFAULT: u8 = 0;

/// Rule type byte of a logical rule
pub const RULE_TYPE_LOGICAL: u8 = 1;

/// Item tag of a destination IP CIDR list (0x06 is the source address list)
pub const ITEM_IP_CIDR: u8 = 0x07;

/// Item tag closing a default rule
pub const ITEM_FINAL: u8 = 0xFF;

/// File name prefix of generated rule-sets
pub const FILE_PREFIX: &str = "geoip-";

/// Extension of binary rule-sets
pub const BINARY_EXTENSION: &str = "srs";

/// Extension of source (JSON) rule-sets
pub const SOURCE_EXTENSION: &str = "json";

/// An inclusive address range of one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IpRange {
    pub from: IpAddr,
    pub to: IpAddr,
}

impl IpRange {
    /// Range covered by a network.
    pub fn from_net(net: &IpNet) -> Self {
        Self {
            from: net.network(),
            to: net.broadcast(),
        }
    }

    /// Smallest list of networks covering exactly this range.
    pub fn to_nets(&self) -> Vec<IpNet> {
        match (self.from, self.to) {
            (IpAddr::V4(from), IpAddr::V4(to)) => Ipv4Subnets::new(from, to, 0)
                .map(IpNet::V4)
                .collect(),
            (IpAddr::V6(from), IpAddr::V6(to)) => Ipv6Subnets::new(from, to, 0)
                .map(IpNet::V6)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Parse an `ip_cidr` entry: a CIDR or a bare address.
pub fn parse_cidr(pattern: &str) -> Result<IpNet> {
    let pattern = pattern.trim();
    if let Ok(net) = pattern.parse::<IpNet>() {
        return Ok(net.trunc());
    }
    match pattern.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Ok(IpNet::V4(Ipv4Net::from(ip))),
        Ok(IpAddr::V6(ip)) => Ok(IpNet::V6(Ipv6Net::from(ip))),
        Err(_) => Err(Error::InvalidCidrPattern(pattern.to_string())),
    }
}

/// Sorted, merged ranges covering `networks`.
///
/// IPv4 ranges come before IPv6 ranges. Overlapping and adjacent ranges
/// of the same family are joined.
pub fn ip_set(networks: &[IpNet]) -> Vec<IpRange> {
    let mut ranges: Vec<IpRange> = networks.iter().map(IpRange::from_net).collect();
    ranges.sort();

    let mut merged: Vec<IpRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        if let Some(last) = merged.last_mut() {
            if joins(last, &range) {
                if range.to > last.to {
                    last.to = range.to;
                }
                continue;
            }
        }
        merged.push(range);
    }
    merged
}

/// Whether `next` (sorted after `last`) overlaps or touches `last`.
fn joins(last: &IpRange, next: &IpRange) -> bool {
    match (last.to, next.from) {
        (IpAddr::V4(to), IpAddr::V4(from)) => {
            u32::from(to) == u32::MAX || u32::from(from) <= u32::from(to) + 1
        }
        (IpAddr::V6(to), IpAddr::V6(from)) => {
            u128::from(to) == u128::MAX || u128::from(from) <= u128::from(to) + 1
        }
        _ => false,
    }
}

/// Address bytes in network order.
pub fn addr_bytes(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Address from 4 or 16 network-order bytes.
pub fn addr_from_bytes(bytes: &[u8]) -> Result<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        return Ok(IpAddr::V4(Ipv4Addr::from(octets)));
    }
    if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
        return Ok(IpAddr::V6(Ipv6Addr::from(octets)));
    }
    Err(Error::InvalidRuleSet(format!(
        "address of {} bytes",
        bytes.len()
    )))
}

/// Append `value` as an unsigned LEB128 varint.
pub fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Read an unsigned LEB128 varint of at most 10 bytes.
pub fn read_uvarint<R: Read>(reader: &mut R) -> Result<u64> {
    let mut value = 0u64;
    for i in 0..10 {
        let byte = read_u8(reader)?;
        if i == 9 && byte > 1 {
            break;
        }
        value |= ((byte & 0x7F) as u64) << (7 * i);
        if byte < 0x80 {
            return Ok(value);
        }
    }
    Err(Error::InvalidRuleSet("varint overflows u64".to_string()))
}

/// Read one byte.
pub fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf[0])
}

pub(super) fn truncated(e: std::io::Error) -> Error {
    Error::InvalidRuleSet(format!("read failed: {}", e))
}
