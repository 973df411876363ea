//! Slotted page format.
//!
//! ```text
//! | header | pointer 0 | pointer 1 | ... | free space | ... | body 1 | body 0 |
//!                                       ^ end of pointers  ^ header.offset
//! ```
//!
//! The header is `{num_records: u16, offset: u16}`, each pointer is
//! `{offset: u16, length: u16}`, all little-endian. Pointer and record offsets
//! are relative to the start of the body (the byte right after the header).
//! Pointers grow from the front of the body, record bytes from the back.

use crate::storage::error::{StorageError, StorageResult};
use byteorder::{ByteOrder, LittleEndian};

pub const SLOT_HEADER_SIZE: usize = 4;
pub const POINTER_SIZE: usize = 4;

const NUM_RECORDS_OFFSET: usize = 0;
const FREE_OFFSET_OFFSET: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pointer {
    offset: u16,
    length: u16,
}

impl Pointer {
    fn range(self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.length as usize
    }
}

/// Variable-length record store over a byte buffer.
pub struct Slot<B> {
    bytes: B,
}

impl<B: AsRef<[u8]>> Slot<B> {
    /// Wrap `bytes` without touching its contents. Call [`Slot::init`] on a
    /// fresh buffer.
    pub fn new(bytes: B) -> StorageResult<Self> {
        let len = bytes.as_ref().len();
        if len < SLOT_HEADER_SIZE + POINTER_SIZE || len - SLOT_HEADER_SIZE > u16::MAX as usize {
            return Err(StorageError::InvalidPageSize {
                expected: SLOT_HEADER_SIZE + POINTER_SIZE,
                actual: len,
            });
        }
        Ok(Self { bytes })
    }

    /// For fixed page regions whose size is known to be valid.
    pub(crate) fn from_region(bytes: B) -> Self {
        debug_assert!(bytes.as_ref().len() >= SLOT_HEADER_SIZE + POINTER_SIZE);
        Self { bytes }
    }

    pub fn into_inner(self) -> B {
        self.bytes
    }

    fn body(&self) -> &[u8] {
        &self.bytes.as_ref()[SLOT_HEADER_SIZE..]
    }

    pub fn num_records(&self) -> usize {
        LittleEndian::read_u16(&self.bytes.as_ref()[NUM_RECORDS_OFFSET..]) as usize
    }

    fn free_offset(&self) -> usize {
        LittleEndian::read_u16(&self.bytes.as_ref()[FREE_OFFSET_OFFSET..]) as usize
    }

    /// Body length minus one pointer.
    pub fn capacity(&self) -> usize {
        self.body().len() - POINTER_SIZE
    }

    pub fn free_space(&self) -> usize {
        self.free_offset()
            .saturating_sub(POINTER_SIZE * self.num_records())
    }

    fn pointer(&self, index: usize) -> Pointer {
        let at = index * POINTER_SIZE;
        let body = self.body();
        Pointer {
            offset: LittleEndian::read_u16(&body[at..]),
            length: LittleEndian::read_u16(&body[at + 2..]),
        }
    }

    fn check_index(&self, index: usize) -> StorageResult<()> {
        let len = self.num_records();
        if index >= len {
            return Err(StorageError::InvalidSlotIndex { index, len });
        }
        Ok(())
    }

    pub fn read(&self, index: usize) -> StorageResult<&[u8]> {
        self.check_index(index)?;
        let range = self.pointer(index).range();
        self.body()
            .get(range)
            .ok_or_else(|| StorageError::CorruptRecord(format!("record {} out of bounds", index)))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Slot<B> {
    fn body_mut(&mut self) -> &mut [u8] {
        &mut self.bytes.as_mut()[SLOT_HEADER_SIZE..]
    }

    fn set_num_records(&mut self, n: usize) {
        LittleEndian::write_u16(&mut self.bytes.as_mut()[NUM_RECORDS_OFFSET..], n as u16);
    }

    fn set_free_offset(&mut self, offset: usize) {
        LittleEndian::write_u16(&mut self.bytes.as_mut()[FREE_OFFSET_OFFSET..], offset as u16);
    }

    fn set_pointer(&mut self, index: usize, pointer: Pointer) {
        let at = index * POINTER_SIZE;
        let body = self.body_mut();
        LittleEndian::write_u16(&mut body[at..], pointer.offset);
        LittleEndian::write_u16(&mut body[at + 2..], pointer.length);
    }

    /// Reset to an empty record store.
    pub fn init(&mut self) {
        let body_len = self.body().len();
        self.set_num_records(0);
        self.set_free_offset(body_len);
    }

    pub fn read_mut(&mut self, index: usize) -> StorageResult<&mut [u8]> {
        self.check_index(index)?;
        let range = self.pointer(index).range();
        self.body_mut()
            .get_mut(range)
            .ok_or_else(|| StorageError::CorruptRecord(format!("record {} out of bounds", index)))
    }

    /// Overwrite record `index`, resizing it first if the length differs.
    pub fn write(&mut self, index: usize, buf: &[u8]) -> StorageResult<()> {
        self.resize(index, buf.len())?;
        self.read_mut(index)?.copy_from_slice(buf);
        Ok(())
    }

    /// Insert `buf` as record `index`, shifting later records one position up.
    pub fn insert(&mut self, index: usize, buf: &[u8]) -> StorageResult<()> {
        let n = self.num_records();
        if index > n {
            return Err(StorageError::InvalidSlotIndex { index, len: n });
        }
        let required = POINTER_SIZE + buf.len();
        let available = self.free_space();
        if available < required {
            return Err(StorageError::NoFreeSpace {
                required,
                available,
            });
        }

        let offset = self.free_offset() - buf.len();
        self.set_num_records(n + 1);
        self.set_free_offset(offset);

        let start = index * POINTER_SIZE;
        let end = n * POINTER_SIZE;
        self.body_mut().copy_within(start..end, start + POINTER_SIZE);
        self.set_pointer(
            index,
            Pointer {
                offset: offset as u16,
                length: buf.len() as u16,
            },
        );
        self.body_mut()[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    /// Change the length of record `index` in place.
    ///
    /// Bytes between the free-space boundary and the record move by the
    /// length difference so record bodies stay contiguous. A grown record
    /// keeps its old bytes at its tail; the new prefix is unspecified.
    pub fn resize(&mut self, index: usize, new_length: usize) -> StorageResult<()> {
        self.check_index(index)?;
        let target = self.pointer(index);
        let diff = new_length as isize - target.length as isize;
        if diff == 0 {
            return Ok(());
        }
        let available = self.free_space();
        if diff > 0 && diff as usize > available {
            return Err(StorageError::NoFreeSpace {
                required: diff as usize,
                available,
            });
        }

        let shift = |offset: usize| (offset as isize - diff) as usize;
        let free_offset = self.free_offset();
        let new_free_offset = shift(free_offset);
        // An empty record owns no bytes; grow it from the free-space boundary.
        let target_offset = if target.length == 0 {
            free_offset
        } else {
            target.offset as usize
        };

        self.body_mut()
            .copy_within(free_offset..target_offset, new_free_offset);
        self.set_free_offset(new_free_offset);

        for i in (0..self.num_records()).filter(|&i| i != index) {
            let mut pointer = self.pointer(i);
            if pointer.length > 0 && (pointer.offset as usize) < target_offset {
                pointer.offset = shift(pointer.offset as usize) as u16;
                self.set_pointer(i, pointer);
            }
        }

        let offset = if new_length == 0 {
            new_free_offset
        } else {
            shift(target_offset)
        };
        let pointer = Pointer {
            offset: offset as u16,
            length: new_length as u16,
        };
        self.set_pointer(index, pointer);
        Ok(())
    }

    /// Remove record `index`, shifting later records one position down.
    pub fn remove(&mut self, index: usize) -> StorageResult<()> {
        self.resize(index, 0)?;
        let n = self.num_records();
        let start = (index + 1) * POINTER_SIZE;
        let end = n * POINTER_SIZE;
        self.body_mut().copy_within(start..end, start - POINTER_SIZE);
        self.set_num_records(n - 1);
        Ok(())
    }
}
