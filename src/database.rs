use crate::config::StorageConfig;
use crate::storage::buffer::{BufferPool, BufferPoolManager, SharedBufferPool};
use crate::storage::disk::DiskManager;
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Owns the heap file and the buffer pool in front of it.
pub struct Database {
    path: PathBuf,
    buffer_pool: SharedBufferPool,
}

impl Database {
    /// Create a new heap file at `config.path`.
    pub fn create(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let path = &config.path;
        if path.exists() {
            bail!("Database file already exists at {:?}", path);
        }

        let disk = DiskManager::create(path)
            .with_context(|| format!("Failed to create heap file {:?}", path))?;
        info!("Created database at {:?} with {} frames", path, config.pool_size);
        Self::with_disk(path, disk, config.pool_size)
    }

    /// Open the existing heap file at `config.path`.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let path = &config.path;
        if !path.exists() {
            bail!("Database file does not exist at {:?}", path);
        }

        let disk = DiskManager::open(path)
            .with_context(|| format!("Failed to open heap file {:?}", path))?;
        info!(
            "Opened database at {:?} ({} pages)",
            path,
            disk.next_page_id().0
        );
        Self::with_disk(path, disk, config.pool_size)
    }

    fn with_disk(path: &Path, disk: DiskManager, pool_size: usize) -> Result<Self> {
        let pool = BufferPool::new(pool_size).context("Failed to build buffer pool")?;
        let buffer_pool = BufferPoolManager::new(disk, pool).into_shared();
        Ok(Self {
            path: path.to_path_buf(),
            buffer_pool,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffer_pool(&self) -> SharedBufferPool {
        self.buffer_pool.clone()
    }

    /// Write every dirty page to the heap file.
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool
            .lock()
            .flush()
            .with_context(|| format!("Failed to flush {:?}", self.path))
    }

    pub fn close(self) -> Result<()> {
        self.flush()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Best effort flush on drop
        if let Err(e) = self.flush() {
            warn!("Flush on drop failed: {:#}", e);
        }
    }
}
