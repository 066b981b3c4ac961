//! Data section values and their binary encoding.

use std::collections::BTreeMap;

use super::format::DataType;
use crate::{Error, Result};

/// A value stored in the data section.
///
/// Maps are ordered so that encoding is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    String(String),
    Bytes(Vec<u8>),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Uint128(u128),
    Int32(i32),
    Bool(bool),
    Map(BTreeMap<String, Value>),
    Array(Vec<Value>),
}

impl Value {
    /// Get the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Encode this value, appending to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::String(s) => {
                write_control(out, DataType::Utf8String, s.len());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                write_control(out, DataType::Bytes, b.len());
                out.extend_from_slice(b);
            }
            Value::Uint16(v) => write_uint(out, DataType::Uint16, &v.to_be_bytes()),
            Value::Uint32(v) => write_uint(out, DataType::Uint32, &v.to_be_bytes()),
            Value::Uint64(v) => write_uint(out, DataType::Uint64, &v.to_be_bytes()),
            Value::Uint128(v) => write_uint(out, DataType::Uint128, &v.to_be_bytes()),
            Value::Int32(v) => {
                if *v < 0 {
                    write_control(out, DataType::Int32, 4);
                    out.extend_from_slice(&v.to_be_bytes());
                } else {
                    write_uint(out, DataType::Int32, &v.to_be_bytes());
                }
            }
            Value::Bool(b) => write_control(out, DataType::Boolean, *b as usize),
            Value::Map(map) => {
                write_control(out, DataType::Map, map.len());
                for (key, value) in map {
                    write_control(out, DataType::Utf8String, key.len());
                    out.extend_from_slice(key.as_bytes());
                    value.encode(out);
                }
            }
            Value::Array(items) => {
                write_control(out, DataType::Array, items.len());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    /// Encode this value into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Decode the value starting at `offset`.
    ///
    /// Returns the value and the offset just past it. Pointers and
    /// floating point fields are rejected; every read is bounds-checked.
    pub fn decode(buf: &[u8], offset: usize) -> Result<(Value, usize)> {
        let (type_num, size, mut pos) = read_control(buf, offset)?;
        let value = match type_num {
            2 => {
                let bytes = take(buf, pos, size)?;
                pos += size;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| Error::MalformedSource(format!("invalid UTF-8 string: {}", e)))?;
                Value::String(s.to_string())
            }
            4 => {
                let bytes = take(buf, pos, size)?;
                pos += size;
                Value::Bytes(bytes.to_vec())
            }
            5 | 6 | 9 | 10 => {
                let max = match type_num {
                    5 => 2,
                    6 => 4,
                    9 => 8,
                    _ => 16,
                };
                if size > max {
                    return Err(Error::MalformedSource(format!(
                        "integer of type {} has {} bytes",
                        type_num, size
                    )));
                }
                let v = take(buf, pos, size)?
                    .iter()
                    .fold(0u128, |acc, b| (acc << 8) | *b as u128);
                pos += size;
                match type_num {
                    5 => Value::Uint16(v as u16),
                    6 => Value::Uint32(v as u32),
                    9 => Value::Uint64(v as u64),
                    _ => Value::Uint128(v),
                }
            }
            8 => {
                if size > 4 {
                    return Err(Error::MalformedSource(format!("int32 has {} bytes", size)));
                }
                let v = take(buf, pos, size)?
                    .iter()
                    .fold(0u32, |acc, b| (acc << 8) | *b as u32);
                pos += size;
                Value::Int32(v as i32)
            }
            14 => Value::Bool(size != 0),
            7 => {
                let mut map = BTreeMap::new();
                for _ in 0..size {
                    let (key, next) = Value::decode(buf, pos)?;
                    let Value::String(key) = key else {
                        return Err(Error::MalformedSource("map key is not a string".to_string()));
                    };
                    let (value, next) = Value::decode(buf, next)?;
                    map.insert(key, value);
                    pos = next;
                }
                Value::Map(map)
            }
            11 => {
                let mut items = Vec::with_capacity(size.min(1024));
                for _ in 0..size {
                    let (item, next) = Value::decode(buf, pos)?;
                    items.push(item);
                    pos = next;
                }
                Value::Array(items)
            }
            other => {
                return Err(Error::MalformedSource(format!(
                    "unsupported data type {} at offset {}",
                    other, offset
                )))
            }
        };
        Ok((value, pos))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

fn take(buf: &[u8], pos: usize, len: usize) -> Result<&[u8]> {
    pos.checked_add(len)
        .and_then(|end| buf.get(pos..end))
        .ok_or_else(|| Error::MalformedSource(format!("data truncated at offset {}", pos)))
}

/// Read a control byte and its extended type and size bytes.
fn read_control(buf: &[u8], offset: usize) -> Result<(u8, usize, usize)> {
    let mut pos = offset;
    let control = take(buf, pos, 1)?[0];
    pos += 1;

    let mut type_num = control >> 5;
    if type_num == 0 {
        type_num = take(buf, pos, 1)?[0] + 7;
        pos += 1;
    }
    if type_num == DataType::Pointer as u8 {
        return Err(Error::MalformedSource(format!(
            "unexpected pointer at offset {}",
            offset
        )));
    }

    let mut size = (control & 0x1F) as usize;
    if size >= 29 {
        let extra = size - 28;
        let bytes = take(buf, pos, extra)?;
        pos += extra;
        let n = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
        size = match extra {
            1 => 29 + n,
            2 => 285 + n,
            _ => 65_821 + n,
        };
    }
    Ok((type_num, size, pos))
}

/// Write an unsigned integer using the fewest big-endian bytes.
fn write_uint(out: &mut Vec<u8>, kind: DataType, be_bytes: &[u8]) {
    let skip = be_bytes.iter().take_while(|b| **b == 0).count();
    let payload = &be_bytes[skip..];
    write_control(out, kind, payload.len());
    out.extend_from_slice(payload);
}

/// Write a control byte, the extended type byte and the size bytes.
fn write_control(out: &mut Vec<u8>, kind: DataType, size: usize) {
    let type_num = kind as u8;
    let type_bits = if type_num <= 7 { type_num << 5 } else { 0 };

    let (size_bits, size_bytes): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 29 + 256 {
        (29, vec![(size - 29) as u8])
    } else if size < 285 + 65_536 {
        (30, ((size - 285) as u16).to_be_bytes().to_vec())
    } else {
        (31, ((size - 65_821) as u32).to_be_bytes()[1..].to_vec())
    };

    out.push(type_bits | size_bits);
    if type_num > 7 {
        out.push(type_num - 7);
    }
    out.extend_from_slice(&size_bytes);
}
