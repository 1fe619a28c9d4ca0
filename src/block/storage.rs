use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::block::entry::{check_entry, entry_size, write_entry};
use crate::block::header::BlockHeader;
use crate::block::merge::MergingBlockEntryReader;
use crate::block::monitor::{Cancellation, Monitor};
use crate::block::reader::BlockReader;
use crate::block::BlockEntryCursor;
use crate::cursor::PageCursor;
use crate::error::{Error, Result};
use crate::key::Layout;

/// Number of entry writes a full merge performs: every pass rewrites every
/// entry, and each pass divides the block count by `merge_factor`, rounding up.
pub fn calculate_number_of_entries_written_during_merges(
    entry_count: u64,
    number_of_blocks: u64,
    merge_factor: usize,
) -> u64 {
    let merge_factor = merge_factor.max(2) as u64;
    let mut blocks = number_of_blocks;
    let mut passes = 0u64;
    while blocks > 1 {
        blocks = blocks.div_ceil(merge_factor);
        passes += 1;
    }
    passes * entry_count
}

/// Sorts an unbounded stream of entries using a fixed memory budget.
///
/// Build process:
/// 1. `add` entries in any order; every `buffer_size` bytes are sorted and
///    flushed as one block
/// 2. `done_adding` flushes the rest and seals the file
/// 3. `merge` reduces the blocks to one sorted block
/// 4. `reader` streams the result
///
/// One instance is driven by one thread.
pub struct BlockStorage<L: Layout> {
    layout: L,
    path: PathBuf,
    buffer_size: usize,
    monitor: Arc<dyn Monitor>,
    /// Entries not flushed yet, in insertion order.
    buffered: Vec<(L::Key, L::Value)>,
    /// Encoded size of `buffered`.
    buffered_size: usize,
    write_cursor: PageCursor,
    /// Open while adding.
    file: Option<File>,
    position: u64,
    entry_count: u64,
    number_of_blocks: u64,
    done_adding: bool,
}

impl<L: Layout> BlockStorage<L> {
    /// Create the storage, truncating any file at `path`.
    pub fn new(layout: L, path: &Path, buffer_size: usize, monitor: Arc<dyn Monitor>) -> Result<Self> {
        if buffer_size <= BlockHeader::SIZE {
            return Err(Error::InvalidArgument(format!(
                "buffer size {buffer_size} cannot hold a block header"
            )));
        }
        let file = File::create(path)?;
        Ok(BlockStorage {
            layout,
            path: path.to_path_buf(),
            buffer_size,
            monitor,
            buffered: Vec::new(),
            buffered_size: 0,
            write_cursor: PageCursor::with_capacity(buffer_size),
            file: Some(file),
            position: 0,
            entry_count: 0,
            number_of_blocks: 0,
            done_adding: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &L {
        &self.layout
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn number_of_blocks(&self) -> u64 {
        self.number_of_blocks
    }

    pub fn is_done_adding(&self) -> bool {
        self.done_adding
    }

    /// Buffer an entry, flushing a block first if it would not fit. An
    /// entry larger than the buffer still gets a block of its own.
    pub fn add(&mut self, key: L::Key, value: L::Value) -> Result<()> {
        if self.done_adding {
            return Err(Error::IllegalState("cannot add after done_adding".into()));
        }
        check_entry(&self.layout, &key, &value)?;
        let size = entry_size(&self.layout, &key, &value);
        if !self.buffered.is_empty()
            && BlockHeader::SIZE + self.buffered_size + size > self.buffer_size
        {
            self.flush()?;
        }
        self.buffered.push((key, value));
        self.buffered_size += size;
        self.entry_count += 1;
        self.monitor.entry_added(size);
        Ok(())
    }

    /// Flush what is buffered and stop accepting entries.
    pub fn done_adding(&mut self) -> Result<()> {
        if self.done_adding {
            return Err(Error::IllegalState("done_adding called twice".into()));
        }
        if !self.buffered.is_empty() {
            self.flush()?;
        }
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        self.buffered = Vec::new();
        self.done_adding = true;
        info!(
            path = %self.path.display(),
            entries = self.entry_count,
            blocks = self.number_of_blocks,
            "Done adding to block storage"
        );
        Ok(())
    }

    /// Sort the buffer and append it as one block.
    fn flush(&mut self) -> Result<()> {
        let layout = &self.layout;
        // stable, so equal keys keep insertion order
        self.buffered.sort_by(|a, b| layout.compare(&a.0, &b.0));

        let header = BlockHeader {
            block_size: (BlockHeader::SIZE + self.buffered_size) as u64,
            entry_count: self.buffered.len() as u64,
        };
        self.write_cursor.clear();
        header.write(&mut self.write_cursor);
        for (key, value) in &self.buffered {
            write_entry(&mut self.write_cursor, layout, key, value);
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::IllegalState("block file already sealed".into()))?;
        file.write_all(self.write_cursor.written())?;

        self.position += header.block_size;
        self.number_of_blocks += 1;
        self.monitor
            .block_flushed(header.entry_count, header.block_size, self.position);
        debug!(
            entries = header.entry_count,
            block_size = header.block_size,
            position = self.position,
            "Flushed block"
        );

        self.buffered.clear();
        self.buffered_size = 0;
        Ok(())
    }

    /// Merge all blocks into one, `merge_factor` blocks at a time.
    ///
    /// Uses `merge_factor` read buffers plus one write buffer, each
    /// `buffer_size` bytes. Cancellation is checked between merge groups;
    /// a cancelled merge leaves a valid but unfinished block file. On error
    /// the scratch file is left in place.
    pub fn merge(&mut self, merge_factor: usize, cancellation: &dyn Cancellation) -> Result<()> {
        if !self.done_adding {
            return Err(Error::IllegalState("cannot merge before done_adding".into()));
        }
        if merge_factor < 2 {
            return Err(Error::InvalidArgument(format!(
                "merge factor must be at least 2, got {merge_factor}"
            )));
        }
        let total = calculate_number_of_entries_written_during_merges(
            self.entry_count,
            self.number_of_blocks,
            merge_factor,
        );
        self.monitor.merge_started(self.entry_count, total);
        info!(
            blocks = self.number_of_blocks,
            entries = self.entry_count,
            merge_factor,
            entries_to_write = total,
            "Starting block merge"
        );
        if self.number_of_blocks <= 1 {
            return Ok(());
        }

        let scratch = scratch_path(&self.path);
        let mut source = self.path.clone();
        let mut target = scratch.clone();
        let mut read_buffers: Vec<Vec<u8>> =
            (0..merge_factor).map(|_| vec![0u8; self.buffer_size]).collect();
        let mut write_cursor = std::mem::take(&mut self.write_cursor);

        let outcome = self.merge_passes(
            cancellation,
            &mut source,
            &mut target,
            &mut read_buffers,
            &mut write_cursor,
        );
        self.write_cursor = write_cursor;
        let completed = outcome?;

        // `source` holds the last complete pass; `target` is stale or partial
        if source == self.path {
            remove_if_exists(&target)?;
        } else {
            fs::remove_file(&self.path)?;
            fs::rename(&source, &self.path)?;
        }

        if completed {
            info!(path = %self.path.display(), entries = self.entry_count, "Block merge complete");
        } else {
            warn!(
                path = %self.path.display(),
                blocks = self.number_of_blocks,
                "Block merge cancelled"
            );
        }
        Ok(())
    }

    /// Run passes until one block remains, merging `read_buffers.len()`
    /// blocks per group. Returns false if cancelled.
    fn merge_passes(
        &mut self,
        cancellation: &dyn Cancellation,
        source: &mut PathBuf,
        target: &mut PathBuf,
        read_buffers: &mut [Vec<u8>],
        write_cursor: &mut PageCursor,
    ) -> Result<bool> {
        while self.number_of_blocks > 1 {
            if cancellation.cancelled() {
                return Ok(false);
            }
            let blocks_before = self.number_of_blocks;
            let mut reader = BlockReader::open(self.layout.clone(), source)?;
            let mut target_file = File::create(&*target)?;
            let mut blocks_merged = 0u64;
            let mut blocks_after = 0u64;
            while blocks_merged < blocks_before {
                if cancellation.cancelled() {
                    return Ok(false);
                }
                blocks_merged += perform_single_merge(
                    &self.layout,
                    self.monitor.as_ref(),
                    &mut reader,
                    &mut target_file,
                    read_buffers,
                    write_cursor,
                )?;
                blocks_after += 1;
            }
            target_file.flush()?;
            drop(target_file);

            self.number_of_blocks = blocks_after;
            self.monitor.merge_iteration_finished(blocks_before, blocks_after);
            info!(blocks_before, blocks_after, "Merge iteration finished");
            std::mem::swap(source, target);
        }
        Ok(true)
    }

    /// Open a reader over the blocks written so far.
    pub fn reader(&self) -> Result<BlockReader<L>> {
        if !self.done_adding {
            return Err(Error::IllegalState("cannot read before done_adding".into()));
        }
        BlockReader::open(self.layout.clone(), &self.path)
    }

    /// Delete the block file and any merge scratch file.
    pub fn close(self) -> Result<()> {
        drop(self.file);
        remove_if_exists(&self.path)?;
        remove_if_exists(&scratch_path(&self.path))
    }
}

/// Merge up to `read_buffers.len()` blocks from `reader` into one block on
/// `target`. Returns how many source blocks were consumed.
fn perform_single_merge<L: Layout>(
    layout: &L,
    monitor: &dyn Monitor,
    reader: &mut BlockReader<L>,
    target: &mut File,
    read_buffers: &mut [Vec<u8>],
    write_cursor: &mut PageCursor,
) -> Result<u64> {
    let mut merger = MergingBlockEntryReader::new(layout.clone());
    let mut block_size = 0u64;
    let mut entry_count = 0u64;
    for buffer in read_buffers.iter_mut() {
        let Some(block) = reader.next_block(buffer)? else {
            break;
        };
        block_size += block.block_size();
        entry_count += block.entry_count();
        merger.add_source(block)?;
    }
    let blocks = merger.source_count() as u64;
    if blocks == 0 {
        return Err(Error::Corruption("block file has fewer blocks than recorded".into()));
    }
    trace!(blocks, entries = entry_count, block_size, "Merging block group");

    write_cursor.clear();
    BlockHeader {
        block_size,
        entry_count,
    }
    .write(write_cursor);
    let mut written = 0u64;
    let mut unreported = 0u64;
    while merger.next()? {
        let size = entry_size(layout, merger.key(), merger.value());
        if write_cursor.limit() > 0 && write_cursor.limit() + size > write_cursor.capacity() {
            target.write_all(write_cursor.written())?;
            written += write_cursor.limit() as u64;
            write_cursor.clear();
            monitor.entries_merged(unreported);
            unreported = 0;
        }
        write_entry(write_cursor, layout, merger.key(), merger.value());
        unreported += 1;
    }
    target.write_all(write_cursor.written())?;
    written += write_cursor.limit() as u64;
    monitor.entries_merged(unreported);

    if written > block_size {
        return Err(Error::Corruption(format!(
            "merged block of {written} bytes exceeds the declared {block_size}"
        )));
    }
    let mut padding = block_size - written;
    while padding > 0 {
        let chunk = padding.min(write_cursor.capacity().max(1) as u64) as usize;
        write_cursor.clear();
        write_cursor.put_zeros(chunk);
        target.write_all(write_cursor.written())?;
        padding -= chunk as u64;
    }
    write_cursor.clear();

    for (slot, source) in read_buffers.iter_mut().zip(merger.into_sources()) {
        *slot = source.into_buffer();
    }
    Ok(blocks)
}

fn scratch_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".merge");
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
