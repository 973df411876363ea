//! Branch node: separator keys and child page ids.
//!
//! `children[i]` holds keys in `[keys[i - 1], keys[i])`, with the first child
//! unbounded below and the last unbounded above. A key equal to a separator
//! routes right.
//!
//! On a page:
//!
//! ```text
//! | tag: u8 | pad: 7 | last child: u64 | slot region of {child_i: u64, key_i} |
//! ```

use super::pair::Key;
use super::{insert_into_page, BRANCH_TAG};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::slot::{Slot, POINTER_SIZE, SLOT_HEADER_SIZE};
use crate::storage::page::PageId;
use crate::storage::PAGE_SIZE;

use super::pair::Pair;

pub const BRANCH_HEADER_SIZE: usize = 16;
const LAST_CHILD_OFFSET: usize = 8;
const CHILD_SIZE: usize = 8;

/// Bytes available for entries once the headers are accounted for.
const ENTRY_CAPACITY: usize = PAGE_SIZE - BRANCH_HEADER_SIZE - SLOT_HEADER_SIZE;

/// Branches with fewer keys than this refuse to split.
pub const MIN_KEYS_TO_SPLIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    keys: Vec<Key>,
    children: Vec<PageId>,
}

impl Branch {
    /// Root created when the old root splits.
    pub fn new_root(key: Key, left: PageId, right: PageId) -> Self {
        Self {
            keys: vec![key],
            children: vec![left, right],
        }
    }

    pub fn from_parts(keys: Vec<Key>, children: Vec<PageId>) -> StorageResult<Self> {
        if children.len() != keys.len() + 1 {
            return Err(StorageError::CorruptRecord(format!(
                "branch with {} keys needs {} children, got {}",
                keys.len(),
                keys.len() + 1,
                children.len()
            )));
        }
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(StorageError::CorruptRecord(
                "branch keys are not strictly ascending".to_string(),
            ));
        }
        Ok(Self { keys, children })
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn children(&self) -> &[PageId] {
        &self.children
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    /// Index of the first key not less than `key`.
    pub fn search(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_bytes() < key)
    }

    pub fn child_index(&self, key: &[u8]) -> usize {
        let index = self.search(key);
        match self.keys.get(index) {
            Some(separator) if separator.as_bytes() == key => index + 1,
            _ => index,
        }
    }

    pub fn child_for(&self, key: &[u8]) -> PageId {
        self.children[self.child_index(key)]
    }

    /// Route `pair` to its child and insert it there.
    pub fn insert(&self, pair: &Pair, pool: &mut BufferPoolManager) -> StorageResult<()> {
        let child = self.child_for(pair.key.as_bytes());
        insert_into_page(pool, child, pair).map_err(|source| StorageError::ChildInsert {
            child,
            source: Box::new(source),
        })
    }

    /// Wire in the result of splitting one of our children: `left` is the
    /// new sibling holding keys below `key`, the split child stays to its
    /// right.
    pub fn insert_child(&mut self, key: Key, left: PageId) -> StorageResult<()> {
        let index = self.search(key.as_bytes());
        if self.keys.get(index) == Some(&key) {
            return Err(StorageError::DuplicateKey);
        }
        let required = Self::entry_size(&key);
        let available = ENTRY_CAPACITY.saturating_sub(self.encoded_size());
        if required > available {
            return Err(StorageError::NoFreeSpace {
                required,
                available,
            });
        }
        self.keys.insert(index, key);
        self.children.insert(index, left);
        Ok(())
    }

    /// Promote the median key and move the keys below it, with their
    /// children, into a new left sibling. `self` keeps the keys above it.
    pub fn split(&mut self) -> StorageResult<(Key, Branch)> {
        let len = self.keys.len();
        if len < MIN_KEYS_TO_SPLIT {
            return Err(StorageError::SplitPrecondition { len });
        }

        let mid = len / 2;
        let right_keys = self.keys.split_off(mid + 1);
        let right_children = self.children.split_off(mid + 1);
        let key = self.keys.pop().ok_or(StorageError::SplitPrecondition { len })?;

        let left = Branch {
            keys: std::mem::replace(&mut self.keys, right_keys),
            children: std::mem::replace(&mut self.children, right_children),
        };
        Ok((key, left))
    }

    fn entry_size(key: &Key) -> usize {
        POINTER_SIZE + CHILD_SIZE + key.len()
    }

    /// Bytes the entries take in the slot region of a page.
    pub fn encoded_size(&self) -> usize {
        self.keys.iter().map(Self::entry_size).sum()
    }

    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0] != BRANCH_TAG {
            return Err(StorageError::UnknownNodeType(bytes[0]));
        }

        let slot = Slot::from_region(&bytes[BRANCH_HEADER_SIZE..]);
        let n = slot.num_records();
        let mut keys = Vec::with_capacity(n);
        let mut children = Vec::with_capacity(n + 1);
        for i in 0..n {
            let record = slot.read(i)?;
            if record.len() < CHILD_SIZE {
                return Err(StorageError::CorruptRecord(format!(
                    "branch entry {} is {} bytes",
                    i,
                    record.len()
                )));
            }
            let (child, key) = record.split_at(CHILD_SIZE);
            children.push(read_page_id(child));
            keys.push(Key::from(key));
        }
        children.push(read_page_id(&bytes[LAST_CHILD_OFFSET..LAST_CHILD_OFFSET + CHILD_SIZE]));
        Self::from_parts(keys, children)
    }

    pub fn write_to(&self, data: &mut [u8]) -> StorageResult<()> {
        if data.len() != PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: data.len(),
            });
        }
        data.fill(0);
        data[0] = BRANCH_TAG;
        let last = self.children.last().copied().unwrap_or(PageId::INVALID);
        data[LAST_CHILD_OFFSET..LAST_CHILD_OFFSET + CHILD_SIZE].copy_from_slice(&last.to_bytes());

        let mut slot = Slot::from_region(&mut data[BRANCH_HEADER_SIZE..]);
        slot.init();
        let mut record = Vec::new();
        for (i, (key, child)) in self.keys.iter().zip(&self.children).enumerate() {
            record.clear();
            record.extend_from_slice(&child.to_bytes());
            record.extend_from_slice(key.as_bytes());
            slot.insert(i, &record)?;
        }
        Ok(())
    }
}

fn read_page_id(bytes: &[u8]) -> PageId {
    let mut raw = [0u8; CHILD_SIZE];
    raw.copy_from_slice(bytes);
    PageId::from_bytes(raw)
}
