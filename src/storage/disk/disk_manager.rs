use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use log::{debug, trace, warn};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 4096;

/// Reads and writes whole pages of a heap file. Page `id` lives at byte
/// offset `id * PAGE_SIZE`.
pub struct DiskManager {
    file: File,
    next_page_id: u64,
}

impl DiskManager {
    /// Create (or truncate) the heap file at `path`.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(file)
    }

    /// Open an existing heap file.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file)
    }

    /// The next allocatable page id is derived from the current file length.
    pub fn from_file(file: File) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        let next_page_id = size / PAGE_SIZE as u64;
        let tail = size % PAGE_SIZE as u64;
        if tail != 0 {
            warn!(
                "Heap file ends in a torn page {} ({} of {} bytes)",
                next_page_id, tail, PAGE_SIZE
            );
        }
        debug!("Opened heap file with {} pages", next_page_id);
        Ok(Self { file, next_page_id })
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        Self::check_buffer(buf.len())?;
        let offset = Self::page_offset(page_id)?;
        let file_size = self.file.metadata()?.len();

        // Allocated pages are written lazily; until then they read as zeros.
        if offset >= file_size {
            trace!("Page {} not yet on disk, reading zeros", page_id);
            buf.fill(0);
            return Ok(());
        }
        let on_disk = file_size - offset;
        if on_disk < PAGE_SIZE as u64 {
            return Err(StorageError::TornPage {
                page_id,
                len: on_disk as usize,
            });
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        Self::check_buffer(data.len())?;
        let offset = Self::page_offset(page_id)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        trace!("Wrote page {}", page_id);
        Ok(())
    }

    /// Hand out a fresh page id. Ids are never reused.
    pub fn allocate_page(&mut self) -> PageId {
        let page_id = PageId(self.next_page_id);
        self.next_page_id += 1;
        page_id
    }

    /// Durability barrier for all prior writes.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Number of whole pages currently in the file.
    pub fn num_pages(&self) -> StorageResult<u64> {
        let file_size = self.file.metadata()?.len();
        Ok(file_size / PAGE_SIZE as u64)
    }

    pub fn next_page_id(&self) -> PageId {
        PageId(self.next_page_id)
    }

    fn check_buffer(len: usize) -> StorageResult<()> {
        if len != PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: len,
            });
        }
        Ok(())
    }

    fn page_offset(page_id: PageId) -> StorageResult<u64> {
        if !page_id.is_valid() {
            return Err(StorageError::InvalidPageId(page_id));
        }
        page_id
            .0
            .checked_mul(PAGE_SIZE as u64)
            .ok_or(StorageError::InvalidPageId(page_id))
    }
}
