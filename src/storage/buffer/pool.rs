//! Clock (second-chance) victim selection over a fixed array of frames.
//!
//! Each frame carries a pin count and a usage count. The sweep starts at the
//! clock hand and wraps around:
//!
//! - unpinned with usage 0: victim, the hand stays on it
//! - unpinned with usage > 0: usage is decremented, the hand moves on
//! - pinned: skipped; a full sweep that meets only pinned frames fails

use super::frame::Frame;
use crate::storage::error::{StorageError, StorageResult};
use log::trace;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct BufferPool {
    frames: Vec<Frame>,
    next_victim_id: BufferId,
}

impl BufferPool {
    /// All page buffers are allocated up front and reused in place.
    pub fn new(pool_size: usize) -> StorageResult<Self> {
        if pool_size == 0 {
            return Err(StorageError::EmptyBufferPool);
        }
        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        Ok(Self {
            frames,
            next_victim_id: BufferId(0),
        })
    }

    pub fn size(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, id: BufferId) -> Option<&Frame> {
        self.frames.get(id.0)
    }

    /// Ids handed out by `evict` are always in range.
    pub(crate) fn frame_at(&self, id: BufferId) -> &Frame {
        &self.frames[id.0]
    }

    pub(crate) fn frame_mut(&mut self, id: BufferId) -> &mut Frame {
        &mut self.frames[id.0]
    }

    pub fn next_victim_id(&self) -> BufferId {
        self.next_victim_id
    }

    fn increment_victim_id(&mut self) {
        self.next_victim_id = BufferId((self.next_victim_id.0 + 1) % self.size());
    }

    /// Pick a frame to reuse. Fails with `PoolExhausted` once a full sweep
    /// finds nothing but pinned frames.
    pub fn evict(&mut self) -> StorageResult<BufferId> {
        let pool_size = self.size();
        let mut consecutive_pinned = 0;
        loop {
            let victim = self.next_victim_id;
            let frame = &mut self.frames[victim.0];
            if frame.ref_count == 0 {
                if frame.usage_count == 0 {
                    return Ok(victim);
                }
                frame.usage_count -= 1;
                trace!(
                    "Second chance for frame {} (usage {})",
                    victim,
                    frame.usage_count
                );
                consecutive_pinned = 0;
            } else {
                consecutive_pinned += 1;
                if consecutive_pinned >= pool_size {
                    return Err(StorageError::PoolExhausted);
                }
            }
            self.increment_victim_id();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageId;

    fn occupy(pool: &mut BufferPool, id: usize, ref_count: u32, usage_count: u32) {
        let frame = pool.frame_mut(BufferId(id));
        frame.reassign(PageId(id as u64));
        frame.ref_count = ref_count;
        frame.usage_count = usage_count;
    }

    #[test]
    fn test_empty_pool_evicts_first_frame() -> StorageResult<()> {
        let mut pool = BufferPool::new(3)?;
        assert_eq!(pool.evict()?, BufferId(0));
        // The hand does not move past a chosen victim.
        assert_eq!(pool.next_victim_id(), BufferId(0));
        Ok(())
    }

    #[test]
    fn test_second_chance() -> StorageResult<()> {
        let mut pool = BufferPool::new(3)?;
        occupy(&mut pool, 0, 0, 2);
        occupy(&mut pool, 1, 0, 1);
        occupy(&mut pool, 2, 0, 3);

        // 0: 2->1, 1: 1->0, 2: 3->2, 0: 1->0, 1: victim
        assert_eq!(pool.evict()?, BufferId(1));
        assert_eq!(pool.frame_at(BufferId(0)).usage_count(), 0);
        assert_eq!(pool.frame_at(BufferId(2)).usage_count(), 2);
        Ok(())
    }

    #[test]
    fn test_skips_pinned_frames() -> StorageResult<()> {
        let mut pool = BufferPool::new(3)?;
        occupy(&mut pool, 0, 1, 1);
        occupy(&mut pool, 1, 2, 5);
        occupy(&mut pool, 2, 0, 1);

        assert_eq!(pool.evict()?, BufferId(2));
        assert_eq!(pool.frame_at(BufferId(0)).usage_count(), 1);
        assert_eq!(pool.frame_at(BufferId(1)).usage_count(), 5);
        Ok(())
    }

    #[test]
    fn test_pinned_frame_with_zero_usage_is_not_victim() -> StorageResult<()> {
        let mut pool = BufferPool::new(2)?;
        occupy(&mut pool, 0, 1, 0);
        occupy(&mut pool, 1, 0, 0);
        assert_eq!(pool.evict()?, BufferId(1));
        Ok(())
    }

    #[test]
    fn test_all_pinned_is_exhausted() -> StorageResult<()> {
        let mut pool = BufferPool::new(4)?;
        for i in 0..4 {
            occupy(&mut pool, i, 1, 1);
        }
        assert!(matches!(pool.evict(), Err(StorageError::PoolExhausted)));
        Ok(())
    }

    #[test]
    fn test_zero_size_pool_rejected() {
        assert!(matches!(
            BufferPool::new(0),
            Err(StorageError::EmptyBufferPool)
        ));
    }

    #[test]
    fn test_frame_lookup_out_of_range() -> StorageResult<()> {
        let pool = BufferPool::new(2)?;
        assert!(pool.frame(BufferId(1)).is_some());
        assert!(pool.frame(BufferId(2)).is_none());
        Ok(())
    }
}
