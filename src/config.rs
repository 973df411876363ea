//! Storage configuration.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_POOL_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Heap file holding every page.
    pub path: PathBuf,

    /// Number of frames in the buffer pool.
    pub pool_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("relly.db"),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl StorageConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.pool_size > 0, "Buffer pool size must be at least 1");
        ensure!(
            !self.path.as_os_str().is_empty(),
            "Heap file path must not be empty"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() -> Result<()> {
        let config = StorageConfig::default();
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        config.validate()
    }

    #[test]
    fn test_builder() {
        let config = StorageConfig::new("/tmp/a.db").with_pool_size(3);
        assert_eq!(config.path, PathBuf::from("/tmp/a.db"));
        assert_eq!(config.pool_size, 3);

        let moved = config.with_path("/tmp/b.db");
        assert_eq!(moved.path, PathBuf::from("/tmp/b.db"));
        assert_eq!(moved.pool_size, 3);
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let err = StorageConfig::default()
            .with_pool_size(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("pool size"));
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        assert!(StorageConfig::new("").validate().is_err());
    }

    #[test]
    fn test_bincode_round_trip() -> Result<()> {
        let config = StorageConfig::new("data/heap.db").with_pool_size(16);
        let bytes = bincode::serialize(&config)?;
        let decoded: StorageConfig = bincode::deserialize(&bytes)?;
        assert_eq!(decoded, config);
        Ok(())
    }
}
