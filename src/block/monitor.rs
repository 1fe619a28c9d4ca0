//! Progress callbacks and cancellation for block storage.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Observer of block storage work. Every method defaults to a no-op.
pub trait Monitor: Send + Sync {
    fn entry_added(&self, _entry_size: usize) {}

    fn block_flushed(&self, _entry_count: u64, _block_size: u64, _position_after_flush: u64) {}

    /// `total_entries_to_write` is the number of entry writes all merge
    /// passes will perform together.
    fn merge_started(&self, _entry_count: u64, _total_entries_to_write: u64) {}

    fn merge_iteration_finished(&self, _blocks_before: u64, _blocks_after: u64) {}

    fn entries_merged(&self, _entries: u64) {}
}

/// Monitor that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonitorAdapter;

impl Monitor for MonitorAdapter {}

/// Monitor keeping running totals, used for progress reporting.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    entries_added: AtomicU64,
    blocks_flushed: AtomicU64,
    merge_iterations: AtomicU64,
    total_entries_to_merge: AtomicU64,
    entries_merged: AtomicU64,
}

impl RecordingMonitor {
    pub fn entries_added(&self) -> u64 {
        self.entries_added.load(Ordering::Relaxed)
    }

    pub fn blocks_flushed(&self) -> u64 {
        self.blocks_flushed.load(Ordering::Relaxed)
    }

    pub fn merge_iterations(&self) -> u64 {
        self.merge_iterations.load(Ordering::Relaxed)
    }

    pub fn total_entries_to_merge(&self) -> u64 {
        self.total_entries_to_merge.load(Ordering::Relaxed)
    }

    pub fn total_entries_merged(&self) -> u64 {
        self.entries_merged.load(Ordering::Relaxed)
    }
}

impl Monitor for RecordingMonitor {
    fn entry_added(&self, _entry_size: usize) {
        self.entries_added.fetch_add(1, Ordering::Relaxed);
    }

    fn block_flushed(&self, _entry_count: u64, _block_size: u64, _position_after_flush: u64) {
        self.blocks_flushed.fetch_add(1, Ordering::Relaxed);
    }

    fn merge_started(&self, _entry_count: u64, total_entries_to_write: u64) {
        self.total_entries_to_merge
            .fetch_add(total_entries_to_write, Ordering::Relaxed);
    }

    fn merge_iteration_finished(&self, _blocks_before: u64, _blocks_after: u64) {
        self.merge_iterations.fetch_add(1, Ordering::Relaxed);
    }

    fn entries_merged(&self, entries: u64) {
        self.entries_merged.fetch_add(entries, Ordering::Relaxed);
    }
}

/// Checked by long-running merges between units of work.
pub trait Cancellation: Send + Sync {
    fn cancelled(&self) -> bool;
}

/// Never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotCancellable;

impl Cancellation for NotCancellable {
    fn cancelled(&self) -> bool {
        false
    }
}

/// Cancelled once [`CloseCancellation::cancel`] is called, from any thread.
#[derive(Debug, Default)]
pub struct CloseCancellation {
    cancelled: AtomicBool,
}

impl CloseCancellation {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Cancellation for CloseCancellation {
    fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl<F> Cancellation for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn cancelled(&self) -> bool {
        self()
    }
}
