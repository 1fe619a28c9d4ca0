use std::cmp::Ordering;

use crate::block::{BlockEntryCursor, BlockEntryReader, MergingBlockEntryReader};
use crate::error::{Error, Result};
use crate::key::Layout;

type PartCursor<L> = Box<dyn BlockEntryCursor<<L as Layout>::Key, <L as Layout>::Value> + Send>;

/// Size estimate of a non-unique index, gathered while streaming it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSample {
    /// Number of entries in the index.
    pub index_size: u64,
    /// Number of distinct values among the sampled entries.
    pub unique_values: u64,
    pub sample_size: u64,
    /// Updates applied on top of the sampled entries.
    pub updates: u64,
}

/// Merges the final blocks of several parts into one sorted stream.
///
/// Parts are merged at most `batch_size` at a time: with more parts than
/// that, batches are merged first and their outputs merged again, so no
/// single merge scans more than `batch_size` heads per entry.
pub struct PartMerger<L: Layout> {
    layout: L,
    merger: MergingBlockEntryReader<L, PartCursor<L>>,
    sampler: Option<Sampler<L::Key>>,
}

struct Sampler<K> {
    previous: Option<K>,
    entries: u64,
    unique_values: u64,
}

impl<L: Layout> PartMerger<L> {
    pub fn new(layout: L, parts: Vec<BlockEntryReader<L>>, batch_size: usize) -> Result<Self> {
        if batch_size < 2 {
            return Err(Error::InvalidArgument(format!(
                "part merge batch size must be at least 2, got {batch_size}"
            )));
        }
        let mut cursors: Vec<PartCursor<L>> = parts
            .into_iter()
            .map(|part| Box::new(part) as PartCursor<L>)
            .collect();
        while cursors.len() > batch_size {
            let mut batched = Vec::with_capacity(cursors.len().div_ceil(batch_size));
            let mut remaining = cursors.into_iter().peekable();
            while remaining.peek().is_some() {
                let mut batch = MergingBlockEntryReader::new(layout.clone());
                for cursor in remaining.by_ref().take(batch_size) {
                    batch.add_source(cursor)?;
                }
                batched.push(Box::new(batch) as PartCursor<L>);
            }
            cursors = batched;
        }
        let mut merger = MergingBlockEntryReader::new(layout.clone());
        for cursor in cursors {
            merger.add_source(cursor)?;
        }
        Ok(PartMerger {
            layout,
            merger,
            sampler: None,
        })
    }

    /// Count entries and distinct values as they stream past.
    pub fn with_sampling(mut self) -> Self {
        self.sampler = Some(Sampler {
            previous: None,
            entries: 0,
            unique_values: 0,
        });
        self
    }

    /// Sample of everything returned so far, if sampling is on.
    pub fn index_sample(&self) -> Option<IndexSample> {
        self.sampler.as_ref().map(|sampler| IndexSample {
            index_size: sampler.entries,
            unique_values: sampler.unique_values,
            sample_size: sampler.entries,
            updates: 0,
        })
    }
}

impl<L: Layout> BlockEntryCursor<L::Key, L::Value> for PartMerger<L> {
    fn next(&mut self) -> Result<bool> {
        if !self.merger.next()? {
            return Ok(false);
        }
        if let Some(sampler) = &mut self.sampler {
            let key = self.merger.key();
            sampler.entries += 1;
            match &mut sampler.previous {
                Some(previous) => {
                    if self.layout.compare_value(previous, key) != Ordering::Equal {
                        sampler.unique_values += 1;
                    }
                    self.layout.copy_key(key, previous);
                }
                None => {
                    let mut first = self.layout.new_key();
                    self.layout.copy_key(key, &mut first);
                    sampler.previous = Some(first);
                    sampler.unique_values += 1;
                }
            }
        }
        Ok(true)
    }

    fn key(&self) -> &L::Key {
        self.merger.key()
    }

    fn value(&self) -> &L::Value {
        self.merger.value()
    }
}
