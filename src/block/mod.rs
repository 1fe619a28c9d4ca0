//! External sort of index entries through block files.
//!
//! Entries are buffered in memory, sorted and flushed as blocks. Blocks are
//! then merged `merge_factor` at a time, ping-ponging between the storage
//! file and a scratch file, until a single sorted block remains.
//!
//! ```text
//!  add ──► buffer ──sort──► [blk][blk][blk][blk][blk][blk][blk][blk][blk]
//!                                    merge factor 4, pass 1
//!                           [   block   ][   block   ][ blk ]
//!                                    pass 2
//!                           [             block             ]
//! ```

pub mod entry;
pub mod header;
pub mod merge;
pub mod monitor;
pub mod reader;
pub mod storage;
pub mod update;

use crate::error::Result;

pub use header::BlockHeader;
pub use merge::MergingBlockEntryReader;
pub use monitor::{
    Cancellation, CloseCancellation, Monitor, MonitorAdapter, NotCancellable, RecordingMonitor,
};
pub use reader::{BlockEntryReader, BlockReader};
pub use storage::{BlockStorage, calculate_number_of_entries_written_during_merges};
pub use update::{IndexUpdate, IndexUpdateCursor, IndexUpdateStorage, UpdateMode};

/// A forward-only cursor over sorted entries.
///
/// Block entry readers, merging readers and part readers all implement it,
/// so merges compose.
pub trait BlockEntryCursor<K, V> {
    /// Advance to the next entry. Returns false once exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Current key. Only valid after `next` returned true.
    fn key(&self) -> &K;

    /// Current value. Only valid after `next` returned true.
    fn value(&self) -> &V;
}

impl<K, V, C> BlockEntryCursor<K, V> for Box<C>
where
    C: BlockEntryCursor<K, V> + ?Sized,
{
    fn next(&mut self) -> Result<bool> {
        (**self).next()
    }

    fn key(&self) -> &K {
        (**self).key()
    }

    fn value(&self) -> &V {
        (**self).value()
    }
}
