//! Binary rule-set reader.

use flate2::read::ZlibDecoder;
use std::io::Read;

use super::format::*;
use super::{DefaultHeadlessRule, HeadlessRule, PlainRuleSet};
use crate::{Error, Result};

/// Decode a binary rule-set.
///
/// IP lists come back as the minimal CIDRs of the stored range set.
/// Only default rules with `ip_cidr` items are understood.
pub fn read<R: Read>(mut reader: R) -> Result<PlainRuleSet> {
    let mut magic = [0u8; 3];
    reader.read_exact(&mut magic).map_err(truncated)?;
    if magic != MAGIC {
        return Err(Error::InvalidRuleSet("bad magic bytes".to_string()));
    }
    let version = read_u8(&mut reader)?;
    if version != VERSION {
        return Err(Error::InvalidRuleSet(format!(
            "unsupported version {}",
            version
        )));
    }

    let mut body = ZlibDecoder::new(reader);
    let count = read_uvarint(&mut body)?;
    let mut rules = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        match read_u8(&mut body)? {
            RULE_TYPE_DEFAULT => rules.push(HeadlessRule::Default(read_default_rule(&mut body)?)),
            RULE_TYPE_LOGICAL => {
                return Err(Error::InvalidRuleSet(
                    "logical rules are not supported".to_string(),
                ))
            }
            other => {
                return Err(Error::InvalidRuleSet(format!("unknown rule type {}", other)))
            }
        }
    }

    Ok(PlainRuleSet {
        version: VERSION,
        rules,
    })
}

fn read_default_rule<R: Read>(reader: &mut R) -> Result<DefaultHeadlessRule> {
    let mut rule = DefaultHeadlessRule::default();
    loop {
        match read_u8(reader)? {
            ITEM_IP_CIDR => {
                for range in read_ip_set(reader)? {
                    rule.ip_cidr
                        .extend(range.to_nets().iter().map(|net| net.to_string()));
                }
            }
            ITEM_FINAL => {
                rule.invert = read_u8(reader)? != 0;
                return Ok(rule);
            }
            other => {
                return Err(Error::InvalidRuleSet(format!(
                    "unsupported rule item {:#04x}",
                    other
                )))
            }
        }
    }
}

fn read_ip_set<R: Read>(reader: &mut R) -> Result<Vec<IpRange>> {
    let version = read_u8(reader)?;
    if version != IP_SET_VERSION {
        return Err(Error::InvalidRuleSet(format!(
            "unsupported IP set version {}",
            version
        )));
    }

    let mut count = [0u8; 8];
    reader.read_exact(&mut count).map_err(truncated)?;
    let count = u64::from_be_bytes(count);

    let mut ranges = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        let from = read_addr(reader)?;
        let to = read_addr(reader)?;
        if from.is_ipv4() != to.is_ipv4() || from > to {
            return Err(Error::InvalidRuleSet(format!(
                "invalid range {} - {}",
                from, to
            )));
        }
        ranges.push(IpRange { from, to });
    }
    Ok(ranges)
}

fn read_addr<R: Read>(reader: &mut R) -> Result<std::net::IpAddr> {
    let len = read_uvarint(reader)?;
    if len != 4 && len != 16 {
        return Err(Error::InvalidRuleSet(format!("address of {} bytes", len)));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes).map_err(truncated)?;
    addr_from_bytes(&bytes)
}
