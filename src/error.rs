use std::io;

use thiserror::Error;

use crate::types::EntityId;

/// Unified error type for key encoding, block storage and population.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error from block file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// On-disk data failed validation (bad header, truncated block, bad key bytes).
    #[error("Corruption: {0}")]
    Corruption(String),
    /// Operation called out of order, e.g. merging before adding is done.
    #[error("Illegal state: {0}")]
    IllegalState(String),
    /// Caller supplied a value the codec or storage cannot represent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Two entities share the same value in a unique index.
    #[error("Index entry conflict: entities {first_entity} and {other_entity} share {values}")]
    Conflict {
        first_entity: EntityId,
        other_entity: EntityId,
        values: String,
    },
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
