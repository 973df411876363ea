//! Key/value records and their on-page encoding.
//!
//! ```text
//! | version: u8 | key_len: u16 | key | value_len: u16 | value |
//! ```
//!
//! Lengths are little-endian. Version 1 is the only format so far.

use crate::storage::error::{StorageError, StorageResult};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::fmt;

pub const PAIR_FORMAT_VERSION: u8 = 1;

const VERSION_SIZE: usize = 1;
const LENGTH_SIZE: usize = 2;

/// An opaque key. Keys order by their bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Big-endian, so byte order matches numeric order.
    pub fn from_u64(n: u64) -> Self {
        Self(n.to_be_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "Key({:?})", s),
            _ => write!(f, "Key({:02x?})", self.0),
        }
    }
}

/// One record of a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub key: Key,
    pub value: Vec<u8>,
}

impl Pair {
    pub fn new(key: impl Into<Key>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        VERSION_SIZE + LENGTH_SIZE + self.key.len() + LENGTH_SIZE + self.value.len()
    }

    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        let max = u16::MAX as usize;
        for len in [self.key.len(), self.value.len()] {
            if len > max {
                return Err(StorageError::RecordTooLarge { len, max });
            }
        }

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.write_u8(PAIR_FORMAT_VERSION)?;
        buf.write_u16::<LittleEndian>(self.key.len() as u16)?;
        buf.extend_from_slice(self.key.as_bytes());
        buf.write_u16::<LittleEndian>(self.value.len() as u16)?;
        buf.extend_from_slice(&self.value);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        let (key, rest) = split_key(bytes)?;
        let value_len = read_len(rest, "value length")?;
        let value = rest
            .get(LENGTH_SIZE..LENGTH_SIZE + value_len)
            .ok_or_else(|| truncated("value"))?;
        if rest.len() != LENGTH_SIZE + value_len {
            return Err(StorageError::CorruptRecord(format!(
                "{} trailing bytes",
                rest.len() - LENGTH_SIZE - value_len
            )));
        }
        Ok(Self {
            key: Key::from(key),
            value: value.to_vec(),
        })
    }
}

/// Borrow the key of an encoded pair without decoding the value.
pub fn decode_key(bytes: &[u8]) -> StorageResult<&[u8]> {
    split_key(bytes).map(|(key, _)| key)
}

fn split_key(bytes: &[u8]) -> StorageResult<(&[u8], &[u8])> {
    let version = *bytes.first().ok_or_else(|| truncated("version"))?;
    if version != PAIR_FORMAT_VERSION {
        return Err(StorageError::CorruptRecord(format!(
            "unsupported pair format version {}",
            version
        )));
    }
    let rest = &bytes[VERSION_SIZE..];
    let key_len = read_len(rest, "key length")?;
    let rest = &rest[LENGTH_SIZE..];
    if rest.len() < key_len {
        return Err(truncated("key"));
    }
    Ok(rest.split_at(key_len))
}

fn read_len(bytes: &[u8], what: &str) -> StorageResult<usize> {
    if bytes.len() < LENGTH_SIZE {
        return Err(truncated(what));
    }
    Ok(LittleEndian::read_u16(bytes) as usize)
}

fn truncated(what: &str) -> StorageError {
    StorageError::CorruptRecord(format!("truncated {}", what))
}
