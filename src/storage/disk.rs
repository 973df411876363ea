//! Raw page I/O against the heap file.

pub mod disk_manager;

pub use disk_manager::{DiskManager, PAGE_SIZE};
