pub mod frame;
pub mod pool;

use crate::storage::disk::DiskManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub use frame::{Buffer, Frame};
pub use pool::{BufferId, BufferPool};

/// The one latch around a buffer pool shared by several owners.
pub type SharedBufferPool = Arc<Mutex<BufferPoolManager>>;

/// Maps page ids to frames of a [`BufferPool`] and moves pages between the
/// pool and the [`DiskManager`].
///
/// Every `fetch_page`/`create_page` pins the returned buffer and must be
/// paired with exactly one `take_back_page`. A page that is never taken back
/// can never be evicted.
pub struct BufferPoolManager {
    disk: DiskManager,
    pool: BufferPool,
    page_table: HashMap<PageId, BufferId>,
}

impl BufferPoolManager {
    pub fn new(disk: DiskManager, pool: BufferPool) -> Self {
        let capacity = pool.size();
        Self {
            disk,
            pool,
            page_table: HashMap::with_capacity(capacity),
        }
    }

    pub fn into_shared(self) -> SharedBufferPool {
        Arc::new(Mutex::new(self))
    }

    pub fn fetch_page(&mut self, page_id: PageId) -> StorageResult<Arc<Buffer>> {
        if !page_id.is_valid() {
            return Err(StorageError::InvalidPageId(page_id));
        }

        if let Some(&buffer_id) = self.page_table.get(&page_id) {
            let frame = self.pool.frame_mut(buffer_id);
            frame.usage_count += 1;
            frame.ref_count += 1;
            trace!("Buffer pool hit for page {} in frame {}", page_id, buffer_id);
            return Ok(frame.buffer.clone());
        }

        debug!("Buffer pool miss for page {}, loading from disk", page_id);
        let buffer_id = self.take_victim()?;
        let frame = self.pool.frame_mut(buffer_id);
        let buffer = frame.reassign(page_id).clone();
        let loaded = {
            let mut page = buffer.page_write_unmarked();
            self.disk.read_page(page_id, page.data_mut())
        };
        if let Err(e) = loaded {
            drop(buffer);
            self.pool.frame_mut(buffer_id).clear();
            return Err(e);
        }

        let frame = self.pool.frame_mut(buffer_id);
        frame.ref_count = 1;
        frame.usage_count = 1;
        self.page_table.insert(page_id, buffer_id);
        Ok(buffer)
    }

    /// Allocate a new page and cache it without touching the disk. The page
    /// starts zeroed and dirty, so it reaches the file on eviction or flush.
    pub fn create_page(&mut self) -> StorageResult<Arc<Buffer>> {
        let buffer_id = self.take_victim()?;
        let page_id = self.disk.allocate_page();

        let frame = self.pool.frame_mut(buffer_id);
        let buffer = frame.reassign(page_id).clone();
        buffer.set_dirty(true);
        frame.ref_count = 1;
        frame.usage_count = 1;
        self.page_table.insert(page_id, buffer_id);
        debug!("Allocated new page {} in frame {}", page_id, buffer_id);
        Ok(buffer)
    }

    /// Release one pin on `buffer`'s page.
    pub fn take_back_page(&mut self, buffer: &Buffer) -> StorageResult<()> {
        let page_id = buffer.page_id();
        let buffer_id = *self
            .page_table
            .get(&page_id)
            .ok_or(StorageError::PageNotResident(page_id))?;
        let frame = self.pool.frame_mut(buffer_id);
        if frame.ref_count == 0 {
            warn!("Unbalanced take back of page {}", page_id);
            return Err(StorageError::NotPinned(page_id));
        }
        frame.ref_count -= 1;
        Ok(())
    }

    /// Write every resident dirty page back, then sync the heap file.
    pub fn flush(&mut self) -> StorageResult<()> {
        let mut written = 0;
        for &buffer_id in self.page_table.values() {
            let buffer = &self.pool.frame_at(buffer_id).buffer;
            if buffer.is_dirty() {
                self.disk
                    .write_page(buffer.page_id(), buffer.read().data())?;
                buffer.set_dirty(false);
                written += 1;
            }
        }
        self.disk.sync()?;
        debug!("Flushed {} dirty pages", written);
        Ok(())
    }

    /// Write one resident page back if it is dirty. No sync.
    pub fn flush_page(&mut self, page_id: PageId) -> StorageResult<()> {
        let buffer_id = *self
            .page_table
            .get(&page_id)
            .ok_or(StorageError::PageNotResident(page_id))?;
        let buffer = &self.pool.frame_at(buffer_id).buffer;
        if buffer.is_dirty() {
            self.disk.write_page(page_id, buffer.read().data())?;
            buffer.set_dirty(false);
        }
        Ok(())
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.page_table.contains_key(&page_id)
    }

    /// Pin count of a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        self.page_table
            .get(&page_id)
            .map(|&buffer_id| self.pool.frame_at(buffer_id).ref_count())
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn disk_manager(&self) -> &DiskManager {
        &self.disk
    }

    /// Evict a frame, writing its page back first if dirty, and drop it from
    /// the page table.
    fn take_victim(&mut self) -> StorageResult<BufferId> {
        let buffer_id = self.pool.evict()?;
        let buffer = &self.pool.frame_at(buffer_id).buffer;
        let victim = buffer.page_id();
        if victim.is_valid() {
            if buffer.is_dirty() {
                debug!("Writing back page {} before evicting frame {}", victim, buffer_id);
                self.disk.write_page(victim, buffer.read().data())?;
                buffer.set_dirty(false);
            }
            self.page_table.remove(&victim);
        }
        Ok(buffer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::PAGE_SIZE;
    use anyhow::Result;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;
    use tempfile::{tempdir, TempDir};

    fn create_test_buffer_pool(pool_size: usize) -> Result<(TempDir, BufferPoolManager)> {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempdir()?;
        let disk = DiskManager::create(&dir.path().join("heap"))?;
        Ok((dir, BufferPoolManager::new(disk, BufferPool::new(pool_size)?)))
    }

    #[test]
    fn test_create_page() -> Result<()> {
        let (_dir, mut bpm) = create_test_buffer_pool(10)?;

        let buffer = bpm.create_page()?;
        assert_eq!(buffer.page_id(), PageId(0));
        assert!(buffer.is_dirty());
        assert_eq!(bpm.pin_count(PageId(0)), Some(1));
        assert!(buffer.read().data().iter().all(|&b| b == 0));

        let second = bpm.create_page()?;
        assert_eq!(second.page_id(), PageId(1));
        Ok(())
    }

    #[test]
    fn test_fetch_resident_page_is_cached() -> Result<()> {
        let (_dir, mut bpm) = create_test_buffer_pool(4)?;

        let created = bpm.create_page()?;
        created.write().data_mut()[..5].copy_from_slice(b"cache");

        // Nothing was written to disk, so this only works from memory.
        let fetched = bpm.fetch_page(created.page_id())?;
        assert!(Arc::ptr_eq(&created, &fetched));
        assert_eq!(&fetched.read().data()[..5], b"cache");
        assert_eq!(bpm.pin_count(created.page_id()), Some(2));
        assert_eq!(bpm.disk_manager().num_pages()?, 0);

        Ok(())
    }

    #[test]
    fn test_eviction_writes_back_dirty_page() -> Result<()> {
        let (_dir, mut bpm) = create_test_buffer_pool(1)?;

        let a = bpm.create_page()?;
        let page_a = a.page_id();
        a.write().data_mut()[..8].copy_from_slice(b"Content1");
        bpm.take_back_page(&a)?;
        drop(a);

        let b = bpm.create_page()?;
        assert!(!bpm.is_resident(page_a));
        b.write().data_mut()[..8].copy_from_slice(b"Content2");
        bpm.take_back_page(&b)?;

        let a = bpm.fetch_page(page_a)?;
        let mut expected = vec![0u8; PAGE_SIZE];
        expected[..8].copy_from_slice(b"Content1");
        assert_eq!(&a.read().data()[..], &expected[..]);

        Ok(())
    }

    #[test]
    fn test_pinned_page_blocks_eviction() -> Result<()> {
        let (_dir, mut bpm) = create_test_buffer_pool(1)?;

        let b1 = bpm.create_page()?;
        let p1 = b1.page_id();
        b1.write().data_mut()[0] = 1;
        bpm.take_back_page(&b1)?;

        let b2 = bpm.create_page()?;
        let p2 = b2.page_id();

        // b2 is still pinned
        assert!(matches!(bpm.fetch_page(p1), Err(StorageError::PoolExhausted)));
        assert!(bpm.is_resident(p2));

        bpm.take_back_page(&b2)?;
        let b1 = bpm.fetch_page(p1)?;
        assert_eq!(b1.read().data()[0], 1);
        assert!(!bpm.is_resident(p2));

        Ok(())
    }

    #[test]
    fn test_take_back_errors() -> Result<()> {
        let (_dir, mut bpm) = create_test_buffer_pool(1)?;

        let b1 = bpm.create_page()?;
        bpm.take_back_page(&b1)?;
        assert!(matches!(
            bpm.take_back_page(&b1),
            Err(StorageError::NotPinned(_))
        ));

        let b2 = bpm.create_page()?;
        assert!(matches!(
            bpm.take_back_page(&b1),
            Err(StorageError::PageNotResident(_))
        ));
        bpm.take_back_page(&b2)?;

        Ok(())
    }

    #[test]
    fn test_fetch_invalid_page_id() -> Result<()> {
        let (_dir, mut bpm) = create_test_buffer_pool(1)?;
        assert!(matches!(
            bpm.fetch_page(PageId::INVALID),
            Err(StorageError::InvalidPageId(_))
        ));
        Ok(())
    }

    #[test]
    fn test_flush_persists_and_clears_dirty() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("heap");
        let page_id = {
            let disk = DiskManager::create(&path)?;
            let mut bpm = BufferPoolManager::new(disk, BufferPool::new(4)?);
            let buffer = bpm.create_page()?;
            buffer.write().data_mut()[100] = 99;
            bpm.take_back_page(&buffer)?;
            bpm.flush()?;
            assert!(!buffer.is_dirty());
            buffer.page_id()
        };

        let disk = DiskManager::open(&path)?;
        let mut bpm = BufferPoolManager::new(disk, BufferPool::new(4)?);
        let buffer = bpm.fetch_page(page_id)?;
        assert_eq!(buffer.read().data()[100], 99);
        Ok(())
    }

    #[test]
    fn test_flush_page() -> Result<()> {
        let (_dir, mut bpm) = create_test_buffer_pool(2)?;
        let buffer = bpm.create_page()?;
        buffer.write().data_mut()[0] = 5;
        bpm.flush_page(buffer.page_id())?;
        assert!(!buffer.is_dirty());
        assert_eq!(bpm.disk_manager().num_pages()?, 1);
        assert!(bpm.flush_page(PageId(42)).is_err());
        Ok(())
    }

    #[test]
    fn test_clock_prefers_less_used_page() -> Result<()> {
        let (_dir, mut bpm) = create_test_buffer_pool(2)?;

        let hot = bpm.create_page()?;
        let cold = bpm.create_page()?;
        for _ in 0..3 {
            let again = bpm.fetch_page(hot.page_id())?;
            bpm.take_back_page(&again)?;
        }
        bpm.take_back_page(&hot)?;
        bpm.take_back_page(&cold)?;

        let fresh = bpm.create_page()?;
        assert!(bpm.is_resident(hot.page_id()));
        assert!(!bpm.is_resident(cold.page_id()));
        bpm.take_back_page(&fresh)?;
        Ok(())
    }

    #[test]
    fn test_random_pins_never_evict_pinned_pages() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let (_dir, mut bpm) = create_test_buffer_pool(4)?;
        let mut pinned: Vec<Arc<Buffer>> = Vec::new();
        let mut known: Vec<PageId> = Vec::new();

        for _ in 0..500 {
            match rng.gen_range(0..3) {
                0 => match bpm.create_page() {
                    Ok(buffer) => {
                        buffer.write().data_mut()[0] = buffer.page_id().0 as u8;
                        known.push(buffer.page_id());
                        pinned.push(buffer);
                    }
                    Err(StorageError::PoolExhausted) => {
                        let distinct: HashSet<PageId> =
                            pinned.iter().map(|b| b.page_id()).collect();
                        assert_eq!(distinct.len(), 4);
                    }
                    Err(e) => return Err(e.into()),
                },
                1 if !known.is_empty() => {
                    let page_id = known[rng.gen_range(0..known.len())];
                    match bpm.fetch_page(page_id) {
                        Ok(buffer) => {
                            assert_eq!(buffer.read().data()[0], page_id.0 as u8);
                            pinned.push(buffer);
                        }
                        Err(StorageError::PoolExhausted) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                _ if !pinned.is_empty() => {
                    let buffer = pinned.swap_remove(rng.gen_range(0..pinned.len()));
                    bpm.take_back_page(&buffer)?;
                }
                _ => {}
            }

            for buffer in &pinned {
                assert!(bpm.is_resident(buffer.page_id()));
                assert!(bpm.pin_count(buffer.page_id()).unwrap_or(0) > 0);
            }
        }
        Ok(())
    }
}
