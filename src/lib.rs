//! # Native Index Keys and Block Sort
//!
//! Building blocks for native schema indexes: a polymorphic key codec that
//! stores any indexable value in a compact, totally ordered binary form,
//! and an external sort that turns unsorted scan updates into one sorted
//! stream with a bounded amount of memory.
//!
//! ## Core idea
//! A bulk index build cannot sort in memory. Entries are buffered, sorted
//! and flushed as blocks, then the blocks are merged a few at a time until
//! one remains. Every key type, sentinel and range boundary compares through
//! the same order, so the merged stream is exactly the order of the index.

pub mod block;
pub mod config;
pub mod cursor;
pub mod curve;
pub mod error;
pub mod key;
pub mod populate;
pub mod types;

// Public re-exports for the top-level API
pub use block::{BlockStorage, Cancellation, Monitor, NotCancellable};
pub use config::BlockStorageConfig;
pub use error::{Error, Result};
pub use key::{GenericLayout, IndexKey, KeyState, KeyType, Layout, Value};
pub use populate::{
    BlockPopulator, IndexSample, IndexWriter, MergeProgress, PopulatingUpdater, UniqueIndexWriter,
};
pub use types::{EntityId, Inclusion};
