//! Bulk population of an index from a full scan.
//!
//! Each producer thread gets its own part: a [`BlockStorage`] it fills
//! without coordination. When the scan completes every part is merged down
//! to one block on its own thread, then the parts are merged into a single
//! sorted stream written to an [`IndexWriter`].
//!
//! Updates to the indexed data made during the scan are recorded through a
//! [`PopulatingUpdater`] and replayed, in arrival order, after the stream.

pub mod conflict;
pub mod part_merger;
pub mod updater;
pub mod writer;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::block::{
    BlockEntryCursor, BlockStorage, Cancellation, CloseCancellation, IndexUpdateStorage, Monitor,
    MonitorAdapter, RecordingMonitor, UpdateMode,
};
use crate::config::BlockStorageConfig;
use crate::error::{Error, Result};
use crate::key::{GenericLayout, IndexKey, Layout};
use crate::types::EntityId;

pub use conflict::ConflictDetector;
pub use part_merger::{IndexSample, PartMerger};
pub use updater::PopulatingUpdater;
pub use writer::CoalescingWriter;

/// The index being built. Scan entries arrive sorted; replayed updates
/// arrive in any order.
pub trait IndexWriter<L: Layout> {
    /// Insert an entry, replacing an equal one.
    fn put(&mut self, key: &L::Key, value: &L::Value) -> Result<()>;

    /// Remove the entry with this key, if present.
    fn remove(&mut self, key: &L::Key) -> Result<()>;
}

/// An index that can be searched by value, needed to verify uniqueness.
pub trait UniqueIndexWriter: IndexWriter<GenericLayout> {
    /// Entities of every entry whose values equal those of `key`, in index order.
    fn entities_with_values(&mut self, key: &IndexKey) -> Result<Vec<EntityId>>;
}

/// Population events on top of the per-part block storage events.
pub trait PopulationMonitor: Monitor {
    fn scan_completed_started(&self) {}

    fn scan_completed_ended(&self) {}
}

impl PopulationMonitor for MonitorAdapter {}

/// Merge progress across all parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeProgress {
    pub completed: u64,
    pub total: u64,
}

impl MergeProgress {
    /// Completed share in `0.0..=1.0`. Nothing to do counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.completed as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Keeps totals for progress and forwards every event to the population monitor.
struct PartMonitor {
    totals: RecordingMonitor,
    delegate: Arc<dyn PopulationMonitor>,
}

impl Monitor for PartMonitor {
    fn entry_added(&self, entry_size: usize) {
        self.totals.entry_added(entry_size);
        self.delegate.entry_added(entry_size);
    }

    fn block_flushed(&self, entry_count: u64, block_size: u64, position_after_flush: u64) {
        self.totals
            .block_flushed(entry_count, block_size, position_after_flush);
        self.delegate
            .block_flushed(entry_count, block_size, position_after_flush);
    }

    fn merge_started(&self, entry_count: u64, total_entries_to_write: u64) {
        self.totals.merge_started(entry_count, total_entries_to_write);
        self.delegate.merge_started(entry_count, total_entries_to_write);
    }

    fn merge_iteration_finished(&self, blocks_before: u64, blocks_after: u64) {
        self.totals.merge_iteration_finished(blocks_before, blocks_after);
        self.delegate.merge_iteration_finished(blocks_before, blocks_after);
    }

    fn entries_merged(&self, entries: u64) {
        self.totals.entries_merged(entries);
        self.delegate.entries_merged(entries);
    }
}

struct Part<L: Layout> {
    storage: BlockStorage<L>,
    monitor: Arc<PartMonitor>,
}

/// Builds a sorted index from unsorted scan updates.
pub struct BlockPopulator<L: Layout> {
    layout: L,
    directory: PathBuf,
    name: String,
    config: BlockStorageConfig,
    monitor: Arc<dyn PopulationMonitor>,
    parts: Vec<Part<L>>,
    /// Created with the first updater.
    external_updates: Option<Arc<Mutex<IndexUpdateStorage<L>>>>,
    cancellation: Arc<CloseCancellation>,
    merged: bool,
}

impl<L: Layout> BlockPopulator<L> {
    pub fn new(layout: L, directory: &Path, name: &str, config: BlockStorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(BlockPopulator {
            layout,
            directory: directory.to_path_buf(),
            name: name.to_string(),
            config,
            monitor: Arc::new(MonitorAdapter),
            parts: Vec::new(),
            external_updates: None,
            cancellation: Arc::new(CloseCancellation::default()),
            merged: false,
        })
    }

    /// Report to `monitor`. Parts created before this call keep the old one.
    pub fn with_monitor(mut self, monitor: Arc<dyn PopulationMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn layout(&self) -> &L {
        &self.layout
    }

    /// Add a part, returning its id.
    pub fn new_part(&mut self) -> Result<usize> {
        if self.merged {
            return Err(Error::IllegalState("scan already completed".into()));
        }
        if self.cancellation.cancelled() {
            return Err(Error::IllegalState("population already closed".into()));
        }
        let id = self.parts.len();
        let path = self.directory.join(format!("{}.scan-{id}", self.name));
        let monitor = Arc::new(PartMonitor {
            totals: RecordingMonitor::default(),
            delegate: self.monitor.clone(),
        });
        let storage = BlockStorage::new(
            self.layout.clone(),
            &path,
            self.config.buffer_size,
            monitor.clone() as Arc<dyn Monitor>,
        )?;
        self.parts.push(Part { storage, monitor });
        Ok(id)
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn add(&mut self, part: usize, key: L::Key, value: L::Value) -> Result<()> {
        self.part_mut(part)?.add(key, value)
    }

    /// One storage per part, for filling parts from separate threads.
    pub fn parts_mut(&mut self) -> impl Iterator<Item = &mut BlockStorage<L>> {
        self.parts.iter_mut().map(|part| &mut part.storage)
    }

    fn part_mut(&mut self, part: usize) -> Result<&mut BlockStorage<L>> {
        self.parts
            .get_mut(part)
            .map(|part| &mut part.storage)
            .ok_or_else(|| Error::InvalidArgument(format!("no part {part}")))
    }

    /// Updater for changes made while the scan runs. All updaters share one
    /// update file, `<name>.ext`.
    pub fn new_populating_updater(&mut self) -> Result<PopulatingUpdater<L>> {
        if self.merged {
            return Err(Error::IllegalState(
                "scan already completed, apply updates to the index directly".into(),
            ));
        }
        let updates = match &self.external_updates {
            Some(updates) => updates.clone(),
            None => {
                let path = self.directory.join(format!("{}.ext", self.name));
                let updates = Arc::new(Mutex::new(IndexUpdateStorage::new(
                    self.layout.clone(),
                    &path,
                )?));
                self.external_updates = Some(updates.clone());
                updates
            }
        };
        Ok(PopulatingUpdater::new(updates))
    }

    /// Number of updates recorded by populating updaters.
    pub fn external_update_count(&self) -> u64 {
        self.external_updates
            .as_ref()
            .map_or(0, |updates| updates.lock().count())
    }

    /// Handle for cancelling from another thread.
    pub fn cancellation(&self) -> Arc<CloseCancellation> {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn progress(&self) -> MergeProgress {
        self.parts.iter().fold(MergeProgress::default(), |acc, part| MergeProgress {
            completed: acc.completed + part.monitor.totals.total_entries_merged(),
            total: acc.total + part.monitor.totals.total_entries_to_merge(),
        })
    }

    /// Seal every part and merge each down to one block, in parallel.
    pub fn merge_parts(&mut self) -> Result<()> {
        if self.merged {
            return Ok(());
        }
        for part in &mut self.parts {
            if !part.storage.is_done_adding() {
                part.storage.done_adding()?;
            }
        }
        let merge_factor = self.config.merge_factor;
        let cancellation: &CloseCancellation = &self.cancellation;
        let results: Vec<Result<()>> = thread::scope(|scope| {
            let merges: Vec<_> = self
                .parts
                .iter_mut()
                .map(|part| {
                    let storage = &mut part.storage;
                    scope.spawn(move || storage.merge(merge_factor, cancellation))
                })
                .collect();
            merges
                .into_iter()
                .map(|merge| {
                    merge
                        .join()
                        .unwrap_or_else(|_| Err(Error::IllegalState("merge thread panicked".into())))
                })
                .collect()
        });
        results.into_iter().collect::<Result<Vec<()>>>()?;
        self.merged = true;
        Ok(())
    }

    /// Merge everything, write the sorted entries to `writer`, then apply
    /// the updates recorded while scanning.
    ///
    /// Returns the sample of the written index, or `None` if the population
    /// was cancelled before it finished.
    pub fn scan_completed<W: IndexWriter<L>>(&mut self, writer: &mut W) -> Result<Option<IndexSample>> {
        self.monitor.scan_completed_started();
        let result = self.build(writer, |writer, key, value| writer.put(key, value), |_, _| Ok(()));
        self.monitor.scan_completed_ended();
        result
    }

    /// Stream the merged scan entries through `write`, then replay the
    /// external updates, calling `check_external` before each insert.
    fn build<W, S, C>(
        &mut self,
        writer: &mut W,
        mut write: S,
        mut check_external: C,
    ) -> Result<Option<IndexSample>>
    where
        W: IndexWriter<L>,
        S: FnMut(&mut W, &L::Key, &L::Value) -> Result<()>,
        C: FnMut(&mut W, &L::Key) -> Result<()>,
    {
        if self.cancellation.cancelled() {
            warn!(index = %self.name, "Population cancelled before merge");
            return Ok(None);
        }
        self.merge_parts()?;
        if let Some(updates) = &self.external_updates {
            updates.lock().done_adding()?;
        }
        if self.cancellation.cancelled() {
            warn!(index = %self.name, "Population cancelled during merge");
            return Ok(None);
        }

        let Some(mut sample) = self.write_scan_updates(writer, &mut write)? else {
            return Ok(None);
        };
        let Some(applied) = self.write_external_updates(writer, &mut check_external)? else {
            return Ok(None);
        };
        sample.updates = applied;
        Ok(Some(sample))
    }

    fn write_scan_updates<W, S>(&self, writer: &mut W, write: &mut S) -> Result<Option<IndexSample>>
    where
        W: IndexWriter<L>,
        S: FnMut(&mut W, &L::Key, &L::Value) -> Result<()>,
    {
        let mut blocks = Vec::with_capacity(self.parts.len());
        let mut scratch = Vec::new();
        for part in &self.parts {
            let mut reader = part.storage.reader()?;
            let mut buffer = vec![0u8; self.config.buffer_size];
            if let Some(block) = reader.next_block(&mut buffer)? {
                blocks.push(block);
            }
            if reader.next_block(&mut scratch)?.is_some() {
                return Err(Error::IllegalState(format!(
                    "part {} still has multiple blocks after merge",
                    part.storage.path().display()
                )));
            }
        }

        let mut entries =
            PartMerger::new(self.layout.clone(), blocks, self.config.part_merge_batch_size)?
                .with_sampling();
        let mut streamed = 0u64;
        while entries.next()? {
            if self.cancellation.cancelled() {
                warn!(index = %self.name, streamed, "Population cancelled while streaming");
                return Ok(None);
            }
            write(writer, entries.key(), entries.value())?;
            streamed += 1;
        }
        info!(index = %self.name, parts = self.parts.len(), entries = streamed, "Scan merged");
        Ok(Some(entries.index_sample().unwrap_or_default()))
    }

    /// Apply recorded updates in arrival order. Returns how many were
    /// applied, or `None` if cancelled.
    fn write_external_updates<W, C>(&self, writer: &mut W, check: &mut C) -> Result<Option<u64>>
    where
        W: IndexWriter<L>,
        C: FnMut(&mut W, &L::Key) -> Result<()>,
    {
        let Some(updates) = &self.external_updates else {
            return Ok(Some(0));
        };
        let mut updates = updates.lock().reader()?;
        let mut applied = 0u64;
        while updates.next()? {
            if self.cancellation.cancelled() {
                warn!(index = %self.name, applied, "Population cancelled while applying updates");
                return Ok(None);
            }
            match updates.mode() {
                Some(UpdateMode::Added) => {
                    check(writer, updates.key())?;
                    writer.put(updates.key(), updates.value())?;
                }
                Some(UpdateMode::Removed) => writer.remove(updates.key())?,
                Some(UpdateMode::Changed) => {
                    writer.remove(updates.key())?;
                    check(writer, updates.key2())?;
                    writer.put(updates.key2(), updates.value())?;
                }
                None => break,
            }
            applied += 1;
        }
        if applied > 0 {
            info!(index = %self.name, updates = applied, "Applied external updates");
        }
        Ok(Some(applied))
    }

    /// Cancel any ongoing work and delete every part and update file.
    pub fn close(self) -> Result<()> {
        self.cancellation.cancel();
        let mut first_error = None;
        for part in self.parts {
            let path = part.storage.path().to_path_buf();
            if let Err(e) = part.storage.close() {
                warn!(path = %path.display(), error = %e, "Failed to delete part file");
                first_error.get_or_insert(e);
            }
        }
        if let Some(updates) = self.external_updates {
            let path = updates.lock().path().to_path_buf();
            let result = match Arc::try_unwrap(updates) {
                Ok(updates) => updates.into_inner().close(),
                // an updater is still alive; delete the file under it
                Err(_) => std::fs::remove_file(&path).map_err(Error::from),
            };
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "Failed to delete update file");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl BlockPopulator<GenericLayout> {
    /// Like [`BlockPopulator::scan_completed`] for a unique index, failing
    /// with [`Error::Conflict`] when two entities end up sharing a value.
    ///
    /// Duplicates are only recorded while writing, since a later update may
    /// remove one side. Every recorded value is searched again once all
    /// updates are applied.
    pub fn scan_completed_unique<W: UniqueIndexWriter>(
        &mut self,
        writer: &mut W,
    ) -> Result<Option<IndexSample>> {
        self.monitor.scan_completed_started();
        let result = self.build_unique(writer);
        self.monitor.scan_completed_ended();
        result
    }

    fn build_unique<W: UniqueIndexWriter>(&mut self, writer: &mut W) -> Result<Option<IndexSample>> {
        let detector = RefCell::new(ConflictDetector::recording(self.layout.clone()));
        let sample = self.build(
            writer,
            |writer, key, value| {
                detector.borrow_mut().check(key)?;
                writer.put(key, value)
            },
            |writer, key| {
                let taken = writer
                    .entities_with_values(key)?
                    .into_iter()
                    .any(|entity| entity != key.entity_id());
                if taken {
                    detector.borrow_mut().record(key)?;
                }
                Ok(())
            },
        )?;
        let Some(sample) = sample else {
            return Ok(None);
        };
        let conflicts = detector.into_inner().take_recorded();
        if !self.verify_unique(writer, conflicts)? {
            return Ok(None);
        }
        Ok(Some(sample))
    }

    /// Search each recorded value and fail on the first one still held by
    /// two entities. Returns false if cancelled.
    fn verify_unique<W: UniqueIndexWriter>(&self, writer: &mut W, conflicts: Vec<IndexKey>) -> Result<bool> {
        for key in conflicts {
            if self.cancellation.cancelled() {
                return Ok(false);
            }
            let entities = writer.entities_with_values(&key)?;
            if let &[first_entity, other_entity, ..] = entities.as_slice() {
                return Err(Error::Conflict {
                    first_entity,
                    other_entity,
                    values: key.to_string(),
                });
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_fraction() {
        assert_eq!(MergeProgress::default().fraction(), 1.0);
        let half = MergeProgress {
            completed: 5,
            total: 10,
        };
        assert_eq!(half.fraction(), 0.5);
    }
}
