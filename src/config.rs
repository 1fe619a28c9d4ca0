//! Configuration for block-based index population.

use serde::{Deserialize, Serialize};

use crate::block::header::BlockHeader;
use crate::error::{Error, Result};

/// Sizing of the external sort used while populating an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStorageConfig {
    /// Bytes buffered in memory before a sorted block is flushed. Also the size
    /// of each read buffer and of the write buffer during merges.
    pub buffer_size: usize,
    /// Number of blocks merged into one per merge group (default: 8).
    pub merge_factor: usize,
    /// Number of part readers merged at once when combining parts (default: 64).
    pub part_merge_batch_size: usize,
}

impl Default for BlockStorageConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024 * 1024, // 1 MiB
            merge_factor: 8,
            part_merge_batch_size: 64,
        }
    }
}

impl BlockStorageConfig {
    /// Reject settings the merge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.merge_factor < 2 {
            return Err(Error::InvalidArgument(format!(
                "merge factor must be at least 2, got {}",
                self.merge_factor
            )));
        }
        if self.buffer_size <= BlockHeader::SIZE {
            return Err(Error::InvalidArgument(format!(
                "buffer size {} cannot hold a block header of {} bytes",
                self.buffer_size,
                BlockHeader::SIZE
            )));
        }
        if self.part_merge_batch_size < 2 {
            return Err(Error::InvalidArgument(format!(
                "part merge batch size must be at least 2, got {}",
                self.part_merge_batch_size
            )));
        }
        Ok(())
    }

    /// Memory held by one merge: one read buffer per merged block plus the write buffer.
    pub fn merge_memory(&self) -> usize {
        (self.merge_factor + 1) * self.buffer_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = BlockStorageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.merge_memory(), 9 * 1024 * 1024);
    }

    #[test]
    fn rejects_merge_factor_below_two() {
        let config = BlockStorageConfig {
            merge_factor: 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn rejects_buffer_smaller_than_header() {
        let config = BlockStorageConfig {
            buffer_size: BlockHeader::SIZE,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }
}
