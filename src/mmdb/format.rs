//! MaxMind DB format constants and key-space helpers.

/// Marker preceding the metadata map at the end of the file.
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Zero bytes separating the search tree from the data section.
pub const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// Binary format version written to the metadata.
pub const BINARY_FORMAT_MAJOR_VERSION: u16 = 2;
pub const BINARY_FORMAT_MINOR_VERSION: u16 = 0;

/// Database type tag of the trees produced by this crate.
pub const GEOIP_DATABASE_TYPE: &str = "sing-geoip";

/// Data section field types.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Pointer = 1,
    Utf8String = 2,
    Double = 3,
    Bytes = 4,
    Uint16 = 5,
    Uint32 = 6,
    Map = 7,
    Int32 = 8,
    Uint64 = 9,
    Uint128 = 10,
    Array = 11,
    Boolean = 14,
    Float = 15,
}

/// Record sizes supported by the search tree.
pub const RECORD_SIZES: [u16; 3] = [24, 28, 32];

/// A prefix in the 128-bit key space of the search tree.
///
/// IPv4 trees use the top 32 bits; IPv6 trees store IPv4 networks
/// under `::/96`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Prefix {
    pub bits: u128,
    pub len: u8,
}

impl Prefix {
    pub const fn new(bits: u128, len: u8) -> Self {
        Self { bits, len }
    }

    /// Bit of the key consumed at `depth` (0 = most significant).
    pub fn bit(&self, depth: u8) -> usize {
        ((self.bits >> (127 - depth as u32)) & 1) as usize
    }

    /// Check whether `other` lies entirely inside this prefix.
    pub fn contains(&self, other: &Prefix) -> bool {
        other.len >= self.len && mask(other.bits, self.len) == mask(self.bits, self.len)
    }
}

/// Clear every bit below the first `len` bits.
pub fn mask(bits: u128, len: u8) -> u128 {
    if len == 0 {
        0
    } else {
        bits & (u128::MAX << (128 - len as u32))
    }
}

/// Where IPv4 lives inside an IPv6 tree.
pub const IPV4_SUBTREE: Prefix = Prefix::new(0, 96);

/// IPv6 ranges that MaxMind writers alias onto the IPv4 subtree.
pub const IPV4_ALIASES: [Prefix; 3] = [
    // ::ffff:0:0/96
    Prefix::new(0xffff_0000_0000, 96),
    // 2001::/32
    Prefix::new(0x2001 << 112, 32),
    // 2002::/16
    Prefix::new(0x2002 << 112, 16),
];

/// IPv4 reserved networks (network, prefix length).
pub const RESERVED_V4: [(u32, u8); 16] = [
    (0x0000_0000, 8),  // 0.0.0.0/8
    (0x0A00_0000, 8),  // 10.0.0.0/8
    (0x6440_0000, 10), // 100.64.0.0/10
    (0x7F00_0000, 8),  // 127.0.0.0/8
    (0xA9FE_0000, 16), // 169.254.0.0/16
    (0xAC10_0000, 12), // 172.16.0.0/12
    (0xC000_0000, 24), // 192.0.0.0/24
    (0xC000_0200, 24), // 192.0.2.0/24
    (0xC058_6300, 24), // 192.88.99.0/24
    (0xC0A8_0000, 16), // 192.168.0.0/16
    (0xC612_0000, 15), // 198.18.0.0/15
    (0xC633_6400, 24), // 198.51.100.0/24
    (0xCB00_7100, 24), // 203.0.113.0/24
    (0xE000_0000, 4),  // 224.0.0.0/4
    (0xF000_0000, 4),  // 240.0.0.0/4
    (0xFFFF_FFFF, 32), // 255.255.255.255/32
];

/// IPv6 reserved networks.
pub const RESERVED_V6: [Prefix; 6] = [
    Prefix::new(0x0100 << 112, 64),          // 100::/64
    Prefix::new(0x2001 << 112, 23),          // 2001::/23
    Prefix::new(0x2001_0db8 << 96, 32),      // 2001:db8::/32
    Prefix::new(0xfc00 << 112, 7),           // fc00::/7
    Prefix::new(0xfe80 << 112, 10),          // fe80::/10
    Prefix::new(0xff00 << 112, 8),           // ff00::/8
];

/// Size in bytes of one search tree node.
pub fn node_size(record_size: u16) -> usize {
    record_size as usize / 4
}

/// Append one node (left and right records) to `out`.
///
/// 28-bit records keep their most significant nibble in the middle byte,
/// left record in the high half.
pub fn write_node(out: &mut Vec<u8>, record_size: u16, left: u32, right: u32) {
    let l = left.to_be_bytes();
    let r = right.to_be_bytes();
    match record_size {
        24 => {
            out.extend_from_slice(&l[1..]);
            out.extend_from_slice(&r[1..]);
        }
        28 => {
            out.extend_from_slice(&l[1..]);
            out.push(((l[0] & 0x0F) << 4) | (r[0] & 0x0F));
            out.extend_from_slice(&r[1..]);
        }
        _ => {
            out.extend_from_slice(&l);
            out.extend_from_slice(&r);
        }
    }
}

/// Read the left (`bit == 0`) or right record of a node.
///
/// Returns `None` when `node` is outside `tree`.
pub fn read_record(tree: &[u8], record_size: u16, node: u32, bit: usize) -> Option<u32> {
    let size = node_size(record_size);
    let start = node as usize * size;
    let b = tree.get(start..start + size)?;
    let value = match (record_size, bit) {
        (24, 0) => u32::from_be_bytes([0, b[0], b[1], b[2]]),
        (24, _) => u32::from_be_bytes([0, b[3], b[4], b[5]]),
        (28, 0) => ((b[3] as u32 & 0xF0) << 20) | u32::from_be_bytes([0, b[0], b[1], b[2]]),
        (28, _) => ((b[3] as u32 & 0x0F) << 24) | u32::from_be_bytes([0, b[4], b[5], b[6]]),
        (_, 0) => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        (_, _) => u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_layout() {
        for record_size in RECORD_SIZES {
            let max = if record_size == 32 {
                u32::MAX
            } else {
                (1u32 << record_size) - 1
            };
            let mut tree = Vec::new();
            write_node(&mut tree, record_size, 1, 2);
            write_node(&mut tree, record_size, max, max - 7);

            assert_eq!(tree.len(), 2 * node_size(record_size));
            assert_eq!(read_record(&tree, record_size, 0, 0), Some(1));
            assert_eq!(read_record(&tree, record_size, 0, 1), Some(2));
            assert_eq!(read_record(&tree, record_size, 1, 0), Some(max));
            assert_eq!(read_record(&tree, record_size, 1, 1), Some(max - 7));
            assert_eq!(read_record(&tree, record_size, 2, 0), None);
        }
    }

    #[test]
    fn test_28_bit_middle_nibbles() {
        let mut tree = Vec::new();
        write_node(&mut tree, 28, 0x0A00_0001, 0x0B00_0002);
        assert_eq!(tree[3], 0xAB);
    }

    #[test]
    fn test_prefix_contains() {
        let outer = Prefix::new(0x2002 << 112, 16);
        let inner = Prefix::new((0x2002 << 112) | (1 << 80), 48);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(Prefix::new(0, 0).contains(&outer));
    }

    #[test]
    fn test_prefix_bit() {
        let p = Prefix::new(1 << 127, 1);
        assert_eq!(p.bit(0), 1);
        assert_eq!(p.bit(1), 0);
    }

    #[test]
    fn test_aliases_are_disjoint_from_ipv4_subtree() {
        for alias in &IPV4_ALIASES {
            assert!(!alias.contains(&IPV4_SUBTREE));
            assert!(!IPV4_SUBTREE.contains(alias));
        }
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(u128::MAX, 0), 0);
        assert_eq!(mask(u128::MAX, 128), u128::MAX);
        assert_eq!(mask(u128::MAX, 1), 1 << 127);
    }
}
