use crate::storage::page::{Page, PageId};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cached page: its id, its bytes and whether they differ from disk.
pub struct Buffer {
    page_id: PageId,
    page: RwLock<Page>,
    is_dirty: AtomicBool,
}

impl Buffer {
    pub(crate) fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            page: RwLock::new(Page::new()),
            is_dirty: AtomicBool::new(false),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Write access. Marks the buffer dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.is_dirty.store(true, Ordering::SeqCst);
        self.page.write()
    }

    /// Write access for loading from disk, which leaves the dirty flag alone.
    pub(crate) fn page_write_unmarked(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::SeqCst)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::SeqCst);
    }

    /// Rebind to another page, keeping the page allocation.
    fn reassign(&mut self, page_id: PageId) {
        self.page_id = page_id;
        self.page.get_mut().reset();
        *self.is_dirty.get_mut() = false;
    }
}

/// One cache slot of the buffer pool.
pub struct Frame {
    pub(crate) buffer: Arc<Buffer>,
    pub(crate) ref_count: u32,
    pub(crate) usage_count: u32,
}

impl Frame {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Arc::new(Buffer::new(PageId::INVALID)),
            ref_count: 0,
            usage_count: 0,
        }
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn page_id(&self) -> PageId {
        self.buffer.page_id()
    }

    /// Pin count. Non-zero frames are never evicted.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Clock weight.
    pub fn usage_count(&self) -> u32 {
        self.usage_count
    }

    /// Load a different page into this frame. The old page allocation is
    /// reused unless someone still holds a handle to the old buffer.
    pub(crate) fn reassign(&mut self, page_id: PageId) -> &Arc<Buffer> {
        match Arc::get_mut(&mut self.buffer) {
            Some(buffer) => buffer.reassign(page_id),
            None => self.buffer = Arc::new(Buffer::new(page_id)),
        }
        self.ref_count = 0;
        self.usage_count = 0;
        &self.buffer
    }

    /// Mark the frame as empty after a failed load.
    pub(crate) fn clear(&mut self) {
        self.reassign(PageId::INVALID);
    }
}
