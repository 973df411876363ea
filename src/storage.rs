//! Storage layer implementation for rellydb.
//!
//! This module provides the page-based foundation the B+ tree is built on:
//!
//! - **Page**: Fixed-size (4KB) blocks of data, the basic unit of I/O
//! - **DiskManager**: Reads and writes pages of a single heap file by page id
//! - **BufferPool**: Fixed set of frames with clock-sweep eviction
//! - **BufferPoolManager**: Maps page ids to frames and enforces pin discipline
//! - **Slot**: Slotted page format for storing variable-length records
//!
//! Nothing here is internally synchronized. A `BufferPoolManager` is driven
//! through `&mut self`; share it behind [`SharedBufferPool`] when more than one
//! owner needs page access.

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{Buffer, BufferPoolManager, SharedBufferPool};
pub use disk::{DiskManager, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use page::{Page, PageId, Slot};
