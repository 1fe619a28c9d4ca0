// Shared helpers for the integration tests.
#![allow(dead_code)]

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use native_index::block::{BlockEntryCursor, BlockStorage, Monitor, MonitorAdapter};
use native_index::cursor::PageCursor;
use native_index::key::Layout;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 8-byte key, 8-byte value, ordered by key. Entries are 16 bytes on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLayout;

impl Layout for FixedLayout {
    type Key = i64;
    type Value = i64;

    fn new_key(&self) -> i64 {
        0
    }

    fn new_value(&self) -> i64 {
        0
    }

    fn copy_key(&self, from: &i64, into: &mut i64) {
        *into = *from;
    }

    fn key_size(&self, _key: &i64) -> usize {
        8
    }

    fn value_size(&self, _value: &i64) -> usize {
        8
    }

    fn write_key(&self, cursor: &mut PageCursor, key: &i64) {
        cursor.put_i64(*key);
    }

    fn write_value(&self, cursor: &mut PageCursor, value: &i64) {
        cursor.put_i64(*value);
    }

    fn read_key(&self, cursor: &mut PageCursor, into: &mut i64, _key_size: usize) -> bool {
        *into = cursor.get_i64();
        !cursor.has_cursor_exception()
    }

    fn read_value(&self, cursor: &mut PageCursor, into: &mut i64, _value_size: usize) -> bool {
        *into = cursor.get_i64();
        !cursor.has_cursor_exception()
    }

    fn compare(&self, left: &i64, right: &i64) -> Ordering {
        left.cmp(right)
    }

    fn fixed_size(&self) -> bool {
        true
    }
}

pub const FIXED_ENTRY_SIZE: usize = 16;

pub fn storage(path: &Path, buffer_size: usize) -> BlockStorage<FixedLayout> {
    BlockStorage::new(FixedLayout, path, buffer_size, Arc::new(MonitorAdapter)).unwrap()
}

pub fn monitored_storage(
    path: &Path,
    buffer_size: usize,
    monitor: Arc<dyn Monitor>,
) -> BlockStorage<FixedLayout> {
    BlockStorage::new(FixedLayout, path, buffer_size, monitor).unwrap()
}

/// Every block of a storage, each as its list of (key, value) entries.
pub fn read_blocks(storage: &BlockStorage<FixedLayout>) -> Vec<Vec<(i64, i64)>> {
    let mut reader = storage.reader().unwrap();
    let mut blocks = Vec::new();
    let mut buffer = Vec::new();
    while let Some(mut block) = reader.next_block(&mut buffer).unwrap() {
        let mut entries = Vec::new();
        while block.next().unwrap() {
            entries.push((*block.key(), *block.value()));
        }
        assert_eq!(entries.len() as u64, block.entry_count());
        buffer = block.into_buffer();
        blocks.push(entries);
    }
    blocks
}

/// `count` entries with random keys; the value is the insertion index.
pub fn random_entries(seed: u64, count: usize) -> Vec<(i64, i64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| (rng.gen_range(-1_000..1_000), i as i64))
        .collect()
}
