//! Binary rule-set writer.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

use super::format::*;
use super::{DefaultHeadlessRule, HeadlessRule, PlainRuleSet};
use crate::{Error, Result};

/// Compile `rule_set` into the binary format and write it to `writer`.
///
/// `ip_cidr` entries may be CIDRs or bare addresses. Each rule's IP list
/// is stored as a sorted, merged range set.
pub fn write<W: Write>(mut writer: W, rule_set: &PlainRuleSet) -> Result<()> {
    let mut body = Vec::new();
    write_uvarint(&mut body, rule_set.rules.len() as u64);
    for rule in &rule_set.rules {
        match rule {
            HeadlessRule::Default(rule) => write_default_rule(&mut body, rule)?,
        }
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&body).map_err(Error::Write)?;
    let compressed = encoder.finish().map_err(Error::Write)?;

    writer.write_all(&MAGIC).map_err(Error::Write)?;
    writer.write_all(&[VERSION]).map_err(Error::Write)?;
    writer.write_all(&compressed).map_err(Error::Write)?;
    writer.flush().map_err(Error::Write)?;
    Ok(())
}

fn write_default_rule(out: &mut Vec<u8>, rule: &DefaultHeadlessRule) -> Result<()> {
    out.push(RULE_TYPE_DEFAULT);

    if !rule.ip_cidr.is_empty() {
        let networks = rule
            .ip_cidr
            .iter()
            .map(|pattern| parse_cidr(pattern))
            .collect::<Result<Vec<_>>>()?;

        out.push(ITEM_IP_CIDR);
        write_ip_set(out, &ip_set(&networks));
    }

    out.push(ITEM_FINAL);
    out.push(rule.invert as u8);
    Ok(())
}

fn write_ip_set(out: &mut Vec<u8>, ranges: &[IpRange]) {
    out.push(IP_SET_VERSION);
    out.extend_from_slice(&(ranges.len() as u64).to_be_bytes());
    for range in ranges {
        for addr in [range.from, range.to] {
            let bytes = addr_bytes(&addr);
            write_uvarint(out, bytes.len() as u64);
            out.extend_from_slice(&bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    fn body(file: &[u8]) -> Vec<u8> {
        let mut decoder = ZlibDecoder::new(&file[4..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_header() {
        let mut file = Vec::new();
        write(&mut file, &PlainRuleSet::default()).unwrap();

        assert_eq!(&file[..3], b"SRS");
        assert_eq!(file[3], 1);
        assert_eq!(body(&file), vec![0]);
    }

    #[test]
    fn test_single_range_body() {
        let rule_set = PlainRuleSet::from_cidrs(vec!["1.2.3.0/24".to_string()]);
        let mut file = Vec::new();
        write(&mut file, &rule_set).unwrap();

        let expected = vec![
            1, // rule count
            RULE_TYPE_DEFAULT,
            ITEM_IP_CIDR,
            IP_SET_VERSION,
            0, 0, 0, 0, 0, 0, 0, 1, // range count
            4, 1, 2, 3, 0,
            4, 1, 2, 3, 255,
            ITEM_FINAL,
            0, // invert
        ];
        assert_eq!(body(&file), expected);
    }

    #[test]
    fn test_rule_matches_destination_cidr() {
        let rule_set = PlainRuleSet::from_cidrs(vec!["1.2.3.0/24".to_string()]);
        let mut file = Vec::new();
        write(&mut file, &rule_set).unwrap();

        // sing-box item numbering: 0x06 source_ip_cidr, 0x07 ip_cidr
        let body = body(&file);
        assert_eq!(&body[..3], &[0x01, 0x00, 0x07]);
    }

    #[test]
    fn test_invalid_cidr_fails() {
        let rule_set = PlainRuleSet::from_cidrs(vec!["1.2.3.0/33".to_string()]);
        let result = write(Vec::new(), &rule_set);
        assert!(matches!(result, Err(Error::InvalidCidrPattern(_))));
    }
}
