//! Search tree serialization.

use ahash::AHashMap;
use std::collections::BTreeMap;
use std::io::Write;

use super::format::*;
use super::tree::{Record, Tree};
use super::Value;
use crate::{Error, Result};

/// Node numbering and data offsets of one serialization pass.
struct Layout {
    /// Reachable nodes in depth-first pre-order
    order: Vec<usize>,
    /// Position of each node in `order` (u32::MAX when unreachable)
    numbers: Vec<u32>,
    /// Data section offset of each referenced value
    offsets: AHashMap<u32, u32>,
    data: Vec<u8>,
}

impl Layout {
    fn node_count(&self) -> u64 {
        self.order.len() as u64
    }

    fn record_value(&self, tree: &Tree, record: Record) -> u64 {
        match record {
            Record::Empty => self.node_count(),
            Record::Node(node) => self.numbers[node] as u64,
            Record::Data(id) => {
                let offset = self.offsets.get(&id).copied().unwrap_or_default();
                self.node_count() + DATA_SECTION_SEPARATOR_SIZE as u64 + offset as u64
            }
            Record::Alias => match tree.ipv4_start() {
                Record::Alias => self.node_count(),
                start => self.record_value(tree, start),
            },
        }
    }
}

impl Tree {
    /// Serialize the tree and its metadata to `writer`.
    ///
    /// Returns the number of bytes written. The output depends only on
    /// the stored associations and the tree options.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<usize> {
        let image = self.to_bytes()?;
        writer.write_all(&image).map_err(Error::Write)?;
        writer.flush().map_err(Error::Write)?;
        Ok(image.len())
    }

    /// Serialize the tree into a new buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let layout = self.layout();
        let record_size = self.options.record_size;

        let max_value = layout.node_count() + DATA_SECTION_SEPARATOR_SIZE as u64 + layout.data.len() as u64;
        if max_value >= 1u64 << record_size {
            return Err(Error::Insertion(format!(
                "{} nodes and {} data bytes do not fit in {}-bit records",
                layout.node_count(),
                layout.data.len(),
                record_size
            )));
        }

        let tree_size = layout.order.len() * node_size(record_size);
        let mut buffer = Vec::with_capacity(
            tree_size + DATA_SECTION_SEPARATOR_SIZE + layout.data.len() + 256,
        );

        for &node in &layout.order {
            let [left, right] = self.nodes[node].children;
            write_node(
                &mut buffer,
                record_size,
                layout.record_value(self, left) as u32,
                layout.record_value(self, right) as u32,
            );
        }

        buffer.resize(buffer.len() + DATA_SECTION_SEPARATOR_SIZE, 0);
        buffer.extend_from_slice(&layout.data);
        buffer.extend_from_slice(METADATA_MARKER);
        self.metadata_value(layout.order.len() as u32)
            .encode(&mut buffer);

        Ok(buffer)
    }

    fn layout(&self) -> Layout {
        let mut order = Vec::new();
        let mut numbers = vec![u32::MAX; self.nodes.len()];
        let mut stack = vec![0usize];

        while let Some(node) = stack.pop() {
            numbers[node] = order.len() as u32;
            order.push(node);
            // right first so the left subtree is numbered next
            for bit in [1, 0] {
                if let Record::Node(child) = self.nodes[node].children[bit] {
                    stack.push(child);
                }
            }
        }

        let mut offsets = AHashMap::new();
        let mut data = Vec::new();
        for &node in &order {
            for record in self.nodes[node].children {
                if let Record::Data(id) = record {
                    if !offsets.contains_key(&id) {
                        offsets.insert(id, data.len() as u32);
                        self.values[id as usize].encode(&mut data);
                    }
                }
            }
        }

        Layout {
            order,
            numbers,
            offsets,
            data,
        }
    }

    fn metadata_value(&self, node_count: u32) -> Value {
        let mut languages = self.options.languages.clone();
        languages.sort();
        languages.dedup();

        let description = self
            .options
            .description
            .iter()
            .map(|(lang, text)| (lang.clone(), Value::from(text.as_str())))
            .collect();

        let mut map = BTreeMap::new();
        map.insert(
            "binary_format_major_version".to_string(),
            Value::Uint16(BINARY_FORMAT_MAJOR_VERSION),
        );
        map.insert(
            "binary_format_minor_version".to_string(),
            Value::Uint16(BINARY_FORMAT_MINOR_VERSION),
        );
        map.insert(
            "build_epoch".to_string(),
            Value::Uint64(self.options.build_epoch),
        );
        map.insert(
            "database_type".to_string(),
            Value::from(self.options.database_type.as_str()),
        );
        map.insert("description".to_string(), Value::Map(description));
        map.insert(
            "ip_version".to_string(),
            Value::Uint16(self.options.ip_version),
        );
        map.insert(
            "languages".to_string(),
            Value::Array(languages.into_iter().map(Value::String).collect()),
        );
        map.insert("node_count".to_string(), Value::Uint32(node_count));
        map.insert(
            "record_size".to_string(),
            Value::Uint16(self.options.record_size),
        );
        Value::Map(map)
    }
}
