//! A small on-disk B+ tree storage engine.
//!
//! Pages live in a single heap file managed by [`storage::DiskManager`] and are
//! cached by a clock-sweep [`storage::BufferPoolManager`]. The [`btree`]
//! module stores leaf and branch nodes in those pages.

pub mod btree;
pub mod config;
pub mod database;
pub mod storage;

pub use config::StorageConfig;
pub use database::Database;
