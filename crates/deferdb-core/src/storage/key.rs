//! Order-preserving key encoding for constraint indexes.
//!
//! Entry format in the index tree:
//! `[handle (8 bytes, big-endian)][encoded key][row_id (8 bytes, big-endian)]`
//!
//! Each encoded component is self-delimiting, so all entries for one key value
//! share the prefix `[handle][encoded key]` and no other key is a prefix of it.

use std::fmt;

use crate::catalog::{IndexHandle, TableId};
use crate::error::Error;
use crate::value::{KeyDisplay, Value};

/// Identifier of a stored row.
pub type RowId = u64;

/// Size of handle, table id and row id prefixes.
pub const ID_SIZE: usize = 8;

const TAG_BOOL: u8 = 0x10;
const TAG_INT: u8 = 0x20;
const TAG_FLOAT: u8 = 0x30;
const TAG_STRING: u8 = 0x40;

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

/// An encoded, NULL-free constraint key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey(Vec<u8>);

impl IndexKey {
    /// Encode key values. Returns `None` if any component is NULL, since such
    /// keys are never indexed and never violate a constraint.
    pub fn encode(values: &[Value]) -> Option<Self> {
        let mut buf = Vec::with_capacity(values.len() * 9);
        for value in values {
            match value {
                Value::Null => return None,
                Value::Bool(b) => {
                    buf.push(TAG_BOOL);
                    buf.push(*b as u8);
                }
                Value::Int(i) => {
                    buf.push(TAG_INT);
                    buf.extend_from_slice(&((*i as u64) ^ (1 << 63)).to_be_bytes());
                }
                Value::Float(f) => {
                    buf.push(TAG_FLOAT);
                    // -0.0 and 0.0 compare equal, so they must encode the same
                    let f = if *f == 0.0 { 0.0f64 } else { *f };
                    let bits = f.to_bits();
                    let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
                    buf.extend_from_slice(&ordered.to_be_bytes());
                }
                Value::String(s) => {
                    buf.push(TAG_STRING);
                    for &b in s.as_bytes() {
                        buf.push(b);
                        if b == ESCAPE {
                            buf.push(ESCAPED_ZERO);
                        }
                    }
                    buf.push(ESCAPE);
                    buf.push(TERMINATOR);
                }
            }
        }
        Some(Self(buf))
    }

    /// Wrap already encoded bytes.
    pub fn from_encoded(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decode back into values.
    pub fn decode(&self) -> Result<Vec<Value>, Error> {
        let mut values = Vec::new();
        let bytes = &self.0;
        let mut pos = 0;
        while pos < bytes.len() {
            let tag = bytes[pos];
            pos += 1;
            match tag {
                TAG_BOOL => {
                    let b = *bytes.get(pos).ok_or(Error::InvalidKey)?;
                    values.push(Value::Bool(b != 0));
                    pos += 1;
                }
                TAG_INT => {
                    let raw = read_u64(bytes, pos)?;
                    values.push(Value::Int((raw ^ (1 << 63)) as i64));
                    pos += ID_SIZE;
                }
                TAG_FLOAT => {
                    let raw = read_u64(bytes, pos)?;
                    let bits = if raw >> 63 == 1 { raw & !(1 << 63) } else { !raw };
                    values.push(Value::Float(f64::from_bits(bits)));
                    pos += ID_SIZE;
                }
                TAG_STRING => {
                    let mut s = Vec::new();
                    loop {
                        let b = *bytes.get(pos).ok_or(Error::InvalidKey)?;
                        pos += 1;
                        if b != ESCAPE {
                            s.push(b);
                            continue;
                        }
                        match bytes.get(pos) {
                            Some(&ESCAPED_ZERO) => {
                                s.push(ESCAPE);
                                pos += 1;
                            }
                            Some(&TERMINATOR) => {
                                pos += 1;
                                break;
                            }
                            _ => return Err(Error::InvalidKey),
                        }
                    }
                    let s = String::from_utf8(s).map_err(|_| Error::InvalidKey)?;
                    values.push(Value::String(s));
                }
                _ => return Err(Error::InvalidKey),
            }
        }
        Ok(values)
    }

    /// Decoded values, or the raw bytes as a string when decoding fails.
    pub fn values_lossy(&self) -> Vec<Value> {
        self.decode()
            .unwrap_or_else(|_| vec![Value::String(format!("{:02x?}", self.0))])
    }
}

impl fmt::Debug for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexKey{}", KeyDisplay(&self.values_lossy()))
    }
}

fn read_u64(bytes: &[u8], pos: usize) -> Result<u64, Error> {
    let slice = bytes.get(pos..pos + ID_SIZE).ok_or(Error::InvalidKey)?;
    let buf: [u8; ID_SIZE] = slice.try_into().map_err(|_| Error::InvalidKey)?;
    Ok(u64::from_be_bytes(buf))
}

/// Prefix shared by all entries of one key value under one handle.
pub fn index_key_prefix(handle: IndexHandle, key: &IndexKey) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ID_SIZE + key.0.len());
    buf.extend_from_slice(&handle.prefix());
    buf.extend_from_slice(&key.0);
    buf
}

/// Full index entry for one row.
pub fn index_entry(handle: IndexHandle, key: &IndexKey, row: RowId) -> Vec<u8> {
    let mut buf = index_key_prefix(handle, key);
    buf.extend_from_slice(&row.to_be_bytes());
    buf
}

/// Split an index entry (handle prefix included) into key and row id.
pub fn split_index_entry(entry: &[u8]) -> Result<(IndexKey, RowId), Error> {
    if entry.len() < ID_SIZE * 2 {
        return Err(Error::InvalidKey);
    }
    let row_at = entry.len() - ID_SIZE;
    let row = read_u64(entry, row_at)?;
    Ok((IndexKey(entry[ID_SIZE..row_at].to_vec()), row))
}

/// Key of a row in the data tree.
pub fn row_key(table: TableId, row: RowId) -> [u8; ID_SIZE * 2] {
    let mut buf = [0u8; ID_SIZE * 2];
    buf[..ID_SIZE].copy_from_slice(&table.to_be_bytes());
    buf[ID_SIZE..].copy_from_slice(&row.to_be_bytes());
    buf
}

/// Row id from a data tree key.
pub fn split_row_key(key: &[u8]) -> Result<RowId, Error> {
    if key.len() != ID_SIZE * 2 {
        return Err(Error::InvalidKey);
    }
    read_u64(key, ID_SIZE)
}

/// Smallest byte string greater than every string starting with `prefix`.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_keys_are_not_encoded() {
        assert!(IndexKey::encode(&[Value::Int(1), Value::Null]).is_none());
        assert!(IndexKey::encode(&[Value::Int(1)]).is_some());
    }

    #[test]
    fn test_integer_order_preserved() {
        let keys: Vec<IndexKey> = [-5i64, -1, 0, 3, i64::MAX]
            .iter()
            .map(|i| IndexKey::encode(&[Value::Int(*i)]).unwrap())
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_float_order_and_zero() {
        let neg = IndexKey::encode(&[Value::Float(-2.5)]).unwrap();
        let zero = IndexKey::encode(&[Value::Float(0.0)]).unwrap();
        let neg_zero = IndexKey::encode(&[Value::Float(-0.0)]).unwrap();
        let pos = IndexKey::encode(&[Value::Float(1.25)]).unwrap();
        assert!(neg < zero && zero < pos);
        assert_eq!(zero, neg_zero);
        assert_eq!(neg.decode().unwrap(), vec![Value::Float(-2.5)]);
    }

    #[test]
    fn test_strings_are_prefix_free() {
        let a = IndexKey::encode(&[Value::String("ab".into()), Value::Int(1)]).unwrap();
        let b = IndexKey::encode(&[Value::String("a".into()), Value::Int(1)]).unwrap();
        assert!(!a.as_bytes().starts_with(b.as_bytes()));
        assert!(b < a);

        let nul = vec![Value::String("a\0b".into()), Value::Bool(true)];
        assert_eq!(IndexKey::encode(&nul).unwrap().decode().unwrap(), nul);
    }

    #[test]
    fn test_index_entry_split() {
        let key = IndexKey::encode(&[Value::Int(7), Value::String("x".into())]).unwrap();
        let entry = index_entry(IndexHandle(3), &key, 42);
        assert!(entry.starts_with(&index_key_prefix(IndexHandle(3), &key)));
        let (decoded, row) = split_index_entry(&entry).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(row, 42);
    }

    #[test]
    fn test_row_key() {
        let key = row_key(5, 9);
        assert_eq!(split_row_key(&key).unwrap(), 9);
        assert!(split_row_key(&key[..4]).is_err());
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(&[1, 2]), Some(vec![1, 3]));
        assert_eq!(prefix_successor(&[1, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_successor(&[0xFF]), None);
    }
}
