use std::cmp::Ordering;

use crate::block::BlockEntryCursor;
use crate::error::Result;
use crate::key::Layout;

/// K-way merge over sorted entry cursors.
///
/// Each step scans the current head of every live source and returns the
/// smallest; equal keys come out in the order the sources were added.
/// Sources are few (the merge factor), so a linear scan beats a heap here.
///
/// Like the block readers, `key` and `value` before the first `next` or
/// after exhaustion return an empty entry rather than failing.
pub struct MergingBlockEntryReader<L: Layout, C> {
    layout: L,
    empty_key: L::Key,
    empty_value: L::Value,
    sources: Vec<C>,
    /// Indexes of sources positioned on an entry, in insertion order.
    live: Vec<usize>,
    /// Source holding the entry returned by the last `next`.
    current: Option<usize>,
}

impl<L, C> MergingBlockEntryReader<L, C>
where
    L: Layout,
    C: BlockEntryCursor<L::Key, L::Value>,
{
    pub fn new(layout: L) -> Self {
        MergingBlockEntryReader {
            empty_key: layout.new_key(),
            empty_value: layout.new_value(),
            layout,
            sources: Vec::new(),
            live: Vec::new(),
            current: None,
        }
    }

    /// Add a source and position it on its first entry.
    pub fn add_source(&mut self, mut source: C) -> Result<()> {
        if source.next()? {
            self.live.push(self.sources.len());
        }
        self.sources.push(source);
        Ok(())
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Give the sources back, in insertion order.
    pub fn into_sources(self) -> Vec<C> {
        self.sources
    }
}

impl<L, C> BlockEntryCursor<L::Key, L::Value> for MergingBlockEntryReader<L, C>
where
    L: Layout,
    C: BlockEntryCursor<L::Key, L::Value>,
{
    fn next(&mut self) -> Result<bool> {
        if let Some(previous) = self.current.take() {
            if !self.sources[previous].next()? {
                self.live.retain(|&s| s != previous);
            }
        }
        let mut smallest: Option<usize> = None;
        for &candidate in &self.live {
            smallest = match smallest {
                Some(best)
                    if self.layout.compare(
                        self.sources[candidate].key(),
                        self.sources[best].key(),
                    ) != Ordering::Less =>
                {
                    Some(best)
                }
                _ => Some(candidate),
            };
        }
        self.current = smallest;
        Ok(smallest.is_some())
    }

    fn key(&self) -> &L::Key {
        match self.current {
            Some(source) => self.sources[source].key(),
            None => &self.empty_key,
        }
    }

    fn value(&self) -> &L::Value {
        match self.current {
            Some(source) => self.sources[source].value(),
            None => &self.empty_value,
        }
    }
}
