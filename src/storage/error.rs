//! Storage layer error types.

use crate::storage::page::PageId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No free space: requires {required} bytes but only {available} available")]
    NoFreeSpace { required: usize, available: usize },

    #[error("Duplicate key")]
    DuplicateKey,

    #[error("Buffer pool exhausted: every frame is pinned")]
    PoolExhausted,

    #[error("Buffer pool needs at least one frame")]
    EmptyBufferPool,

    #[error("Page not resident in buffer pool: {0}")]
    PageNotResident(PageId),

    #[error("Page is not pinned: {0}")]
    NotPinned(PageId),

    #[error("Invalid page id: {0}")]
    InvalidPageId(PageId),

    #[error("Torn page {page_id}: only {len} bytes on disk")]
    TornPage { page_id: PageId, len: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Node too small to split: {len} entries (min 3)")]
    SplitPrecondition { len: usize },

    #[error("Invalid slot index: {index} (records: {len})")]
    InvalidSlotIndex { index: usize, len: usize },

    #[error("Page buffer size must be {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Record too large: {len} bytes (max {max})")]
    RecordTooLarge { len: usize, max: usize },

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Unknown node type tag: {0}")]
    UnknownNodeType(u8),

    #[error("Failed to insert pair into child page {child}")]
    ChildInsert {
        child: PageId,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// The innermost error behind any `ChildInsert` wrapping, e.g. the
    /// `NoFreeSpace` of the leaf that needs a split.
    pub fn root_cause(&self) -> &StorageError {
        match self {
            StorageError::ChildInsert { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
