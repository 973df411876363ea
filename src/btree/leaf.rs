//! Leaf node: sorted, unique-key pairs in a slotted page.
//!
//! ```text
//! | tag: u8 | pad: 7 | prev: u64 | next: u64 | slot region ... |
//! ```
//!
//! `prev`/`next` are the page ids of the neighbouring leaves, or
//! `PageId::INVALID` at either end of the chain.

use super::pair::{decode_key, Key, Pair};
use super::LEAF_TAG;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::slot::{Slot, POINTER_SIZE};
use crate::storage::page::PageId;
use crate::storage::PAGE_SIZE;
use std::cmp::Ordering;

pub const LEAF_HEADER_SIZE: usize = 24;

const PREV_OFFSET: usize = 8;
const NEXT_OFFSET: usize = 16;

/// Leaves with fewer pairs than this refuse to split.
pub const MIN_PAIRS_TO_SPLIT: usize = 3;

#[derive(Clone)]
pub struct Leaf {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Leaf {
    pub fn new() -> Self {
        let mut leaf = Self {
            data: Box::new([0u8; PAGE_SIZE]),
        };
        leaf.data[0] = LEAF_TAG;
        leaf.set_prev(None);
        leaf.set_next(None);
        leaf.slot_mut().init();
        leaf
    }

    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0] != LEAF_TAG {
            return Err(StorageError::UnknownNodeType(bytes[0]));
        }
        let mut data = Box::new([0u8; PAGE_SIZE]);
        data.copy_from_slice(bytes);
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    fn slot(&self) -> Slot<&[u8]> {
        Slot::from_region(&self.data[LEAF_HEADER_SIZE..])
    }

    fn slot_mut(&mut self) -> Slot<&mut [u8]> {
        Slot::from_region(&mut self.data[LEAF_HEADER_SIZE..])
    }

    fn read_link(&self, offset: usize) -> Option<PageId> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[offset..offset + 8]);
        PageId::from_bytes(bytes).valid()
    }

    fn write_link(&mut self, offset: usize, page_id: Option<PageId>) {
        let page_id = page_id.unwrap_or(PageId::INVALID);
        self.data[offset..offset + 8].copy_from_slice(&page_id.to_bytes());
    }

    pub fn prev(&self) -> Option<PageId> {
        self.read_link(PREV_OFFSET)
    }

    pub fn next(&self) -> Option<PageId> {
        self.read_link(NEXT_OFFSET)
    }

    pub fn set_prev(&mut self, prev: Option<PageId>) {
        self.write_link(PREV_OFFSET, prev);
    }

    pub fn set_next(&mut self, next: Option<PageId>) {
        self.write_link(NEXT_OFFSET, next);
    }

    pub fn num_pairs(&self) -> usize {
        self.slot().num_records()
    }

    pub fn free_space(&self) -> usize {
        self.slot().free_space()
    }

    /// Less than half of the capacity is free.
    pub fn is_half_full(&self) -> bool {
        let slot = self.slot();
        2 * slot.free_space() < slot.capacity()
    }

    pub fn pair_at(&self, index: usize) -> StorageResult<Pair> {
        Pair::decode(self.slot().read(index)?)
    }

    pub fn key_at(&self, index: usize) -> StorageResult<Key> {
        let slot = self.slot();
        Ok(Key::from(decode_key(slot.read(index)?)?))
    }

    /// Binary search for `key`: `Ok` with its index if present, otherwise
    /// `Err` with the index it would be inserted at.
    pub fn search(&self, key: &[u8]) -> StorageResult<Result<usize, usize>> {
        let slot = self.slot();
        let (mut low, mut high) = (0, slot.num_records());
        while low < high {
            let mid = low + (high - low) / 2;
            match decode_key(slot.read(mid)?)?.cmp(key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(low))
    }

    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        match self.search(key)? {
            Ok(index) => Ok(Some(self.pair_at(index)?.value)),
            Err(_) => Ok(None),
        }
    }

    /// Insert a pair with a key not yet present in this leaf.
    pub fn insert(&mut self, pair: &Pair) -> StorageResult<()> {
        let record = pair.encode()?;
        let required = POINTER_SIZE + record.len();
        let available = self.free_space();
        if available < required {
            return Err(StorageError::NoFreeSpace {
                required,
                available,
            });
        }

        match self.search(pair.key.as_bytes())? {
            Ok(_) => Err(StorageError::DuplicateKey),
            Err(index) => self.slot_mut().insert(index, &record),
        }
    }

    /// Remove `key`, returning its pair if it was present.
    pub fn remove(&mut self, key: &[u8]) -> StorageResult<Option<Pair>> {
        match self.search(key)? {
            Ok(index) => {
                let pair = self.pair_at(index)?;
                self.slot_mut().remove(index)?;
                Ok(Some(pair))
            }
            Err(_) => Ok(None),
        }
    }

    pub fn pairs(&self) -> impl Iterator<Item = StorageResult<Pair>> + '_ {
        (0..self.num_pairs()).map(move |i| self.pair_at(i))
    }

    /// Move the lower half of the pairs into a new leaf.
    ///
    /// `self` keeps the upper half and becomes the right sibling. Returns the
    /// first key of the upper half, to be promoted into the parent, and the
    /// new left sibling. Sibling links are left for the caller to fix.
    pub fn split(&mut self) -> StorageResult<(Key, Leaf)> {
        let len = self.num_pairs();
        if len < MIN_PAIRS_TO_SPLIT {
            return Err(StorageError::SplitPrecondition { len });
        }

        let mid = len / 2;
        let mut left = Leaf::new();
        for i in 0..mid {
            let record = self.slot().read(0)?.to_vec();
            left.slot_mut().insert(i, &record)?;
            self.slot_mut().remove(0)?;
        }
        let key = self.key_at(0)?;
        Ok((key, left))
    }
}

impl Default for Leaf {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Leaf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leaf")
            .field("prev", &self.prev())
            .field("next", &self.next())
            .field("num_pairs", &self.num_pairs())
            .finish()
    }
}
