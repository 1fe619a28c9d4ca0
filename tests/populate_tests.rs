// Population: parts filled from a scan, merged, and streamed out sorted.

use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::thread;

use native_index::block::{
    BlockEntryCursor, BlockStorage, CloseCancellation, IndexUpdate, Monitor, MonitorAdapter,
    NotCancellable, RecordingMonitor,
};
use native_index::config::BlockStorageConfig;
use native_index::error::{Error, Result};
use native_index::key::{GenericLayout, IndexKey, Layout, NullValue, Value};
use native_index::populate::{
    BlockPopulator, CoalescingWriter, IndexSample, IndexWriter, PopulationMonitor,
    UniqueIndexWriter,
};
use native_index::types::EntityId;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;

fn config(buffer_size: usize, merge_factor: usize) -> BlockStorageConfig {
    BlockStorageConfig {
        buffer_size,
        merge_factor,
        ..BlockStorageConfig::default()
    }
}

fn key(layout: &GenericLayout, entity: i64, value: i64) -> IndexKey {
    layout.key_of(entity, &[Value::Int64(value)]).unwrap()
}

/// Spread `entities` over `parts` parts; entity `e` holds value `e % distinct`.
fn fill(populator: &mut BlockPopulator<GenericLayout>, parts: usize, entities: &[i64], distinct: i64) {
    let layout = populator.layout().clone();
    let ids: Vec<usize> = (0..parts).map(|_| populator.new_part().unwrap()).collect();
    for (i, &entity) in entities.iter().enumerate() {
        let part = ids[i % ids.len()];
        populator
            .add(part, key(&layout, entity, entity % distinct), NullValue)
            .unwrap();
    }
}

fn shuffled(count: i64, seed: u64) -> Vec<i64> {
    let mut entities: Vec<i64> = (0..count).collect();
    entities.shuffle(&mut StdRng::seed_from_u64(seed));
    entities
}

/// Sorted in-memory index that the populator writes into.
struct MemoryIndex {
    layout: GenericLayout,
    keys: Vec<IndexKey>,
}

impl MemoryIndex {
    fn new(layout: &GenericLayout) -> Self {
        MemoryIndex {
            layout: layout.clone(),
            keys: Vec::new(),
        }
    }

    fn entities(&self) -> Vec<EntityId> {
        self.keys.iter().map(IndexKey::entity_id).collect()
    }

    fn search(&self, key: &IndexKey) -> std::result::Result<usize, usize> {
        self.keys
            .binary_search_by(|entry| self.layout.compare(entry, key))
    }
}

impl IndexWriter<GenericLayout> for MemoryIndex {
    fn put(&mut self, key: &IndexKey, _value: &NullValue) -> Result<()> {
        match self.search(key) {
            Ok(at) => self.keys[at] = key.clone(),
            Err(at) => self.keys.insert(at, key.clone()),
        }
        Ok(())
    }

    fn remove(&mut self, key: &IndexKey) -> Result<()> {
        if let Ok(at) = self.search(key) {
            self.keys.remove(at);
        }
        Ok(())
    }
}

impl UniqueIndexWriter for MemoryIndex {
    fn entities_with_values(&mut self, key: &IndexKey) -> Result<Vec<EntityId>> {
        Ok(self
            .keys
            .iter()
            .filter(|candidate| self.layout.compare_value(candidate, key) == Ordering::Equal)
            .map(IndexKey::entity_id)
            .collect())
    }
}

/// Cancels the population from inside the first write.
struct CancellingIndex {
    cancellation: Arc<CloseCancellation>,
    puts: u64,
}

impl IndexWriter<GenericLayout> for CancellingIndex {
    fn put(&mut self, _key: &IndexKey, _value: &NullValue) -> Result<()> {
        self.puts += 1;
        self.cancellation.cancel();
        Ok(())
    }

    fn remove(&mut self, _key: &IndexKey) -> Result<()> {
        Ok(())
    }
}

fn assert_sorted(layout: &GenericLayout, keys: &[IndexKey]) {
    for pair in keys.windows(2) {
        assert_eq!(layout.compare(&pair[0], &pair[1]), Ordering::Less, "{} !< {}", pair[0], pair[1]);
    }
}

// =============================================================================
// Test 1: Entries from every part come out in one sorted stream
// =============================================================================
#[test]
fn scan_streams_all_parts_sorted() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let mut populator =
        BlockPopulator::new(layout.clone(), dir.path(), "index", config(256, 3)).unwrap();
    fill(&mut populator, 3, &shuffled(300, 1), 50);

    let mut index = MemoryIndex::new(&layout);
    let sample = populator.scan_completed(&mut index).unwrap();

    assert_eq!(index.keys.len(), 300);
    assert_sorted(&layout, &index.keys);
    assert_eq!(
        sample,
        Some(IndexSample {
            index_size: 300,
            unique_values: 50,
            sample_size: 300,
            updates: 0,
        })
    );
    populator.close().unwrap();
}

// =============================================================================
// Test 2: More parts than the batch size are merged in rounds
// =============================================================================
#[test]
fn many_parts_merge_in_batches() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let config = BlockStorageConfig {
        part_merge_batch_size: 2,
        ..config(128, 2)
    };
    let mut populator = BlockPopulator::new(layout.clone(), dir.path(), "index", config).unwrap();
    fill(&mut populator, 7, &shuffled(140, 2), 1000);
    assert_eq!(populator.part_count(), 7);

    let mut index = MemoryIndex::new(&layout);
    populator.scan_completed(&mut index).unwrap();
    assert_eq!(index.entities(), (0..140).collect::<Vec<_>>());
    populator.close().unwrap();
}

// =============================================================================
// Test 3: Unique scans fail on two entities sharing a value
// =============================================================================
#[test]
fn unique_scan_accepts_distinct_values() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let mut populator =
        BlockPopulator::new(layout.clone(), dir.path(), "unique", config(256, 2)).unwrap();
    fill(&mut populator, 2, &shuffled(100, 3), 1000);

    let mut index = MemoryIndex::new(&layout);
    let sample = populator.scan_completed_unique(&mut index).unwrap().unwrap();
    assert_eq!(index.keys.len(), 100);
    assert_eq!(sample.unique_values, 100);
    populator.close().unwrap();
}

#[test]
fn unique_scan_reports_conflicting_entities() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let mut populator =
        BlockPopulator::new(layout.clone(), dir.path(), "unique", config(256, 2)).unwrap();
    let first = populator.new_part().unwrap();
    let second = populator.new_part().unwrap();
    populator.add(first, key(&layout, 1, 100), NullValue).unwrap();
    populator.add(first, key(&layout, 20, 7), NullValue).unwrap();
    populator.add(second, key(&layout, 10, 7), NullValue).unwrap();
    populator.add(second, key(&layout, 2, 200), NullValue).unwrap();

    match populator.scan_completed_unique(&mut MemoryIndex::new(&layout)) {
        Err(Error::Conflict {
            first_entity,
            other_entity,
            values,
        }) => {
            assert_eq!((first_entity, other_entity), (10, 20));
            assert!(values.contains('7'), "{values}");
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
    populator.close().unwrap();
}

// =============================================================================
// Test 4: Cancellation yields no result and close removes the part files
// =============================================================================
#[test]
fn cancelled_before_scan_returns_none() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let mut populator =
        BlockPopulator::new(layout.clone(), dir.path(), "index", config(256, 2)).unwrap();
    fill(&mut populator, 2, &shuffled(50, 4), 10);

    populator.cancel();
    let mut index = MemoryIndex::new(&layout);
    let result = populator.scan_completed(&mut index).unwrap();
    assert_eq!(result, None);
    assert!(index.keys.is_empty());
    populator.close().unwrap();
}

#[test]
fn cancelled_while_streaming_returns_none() {
    let dir = tempdir().unwrap();
    let mut populator =
        BlockPopulator::new(GenericLayout::new(1), dir.path(), "index", config(256, 2)).unwrap();
    fill(&mut populator, 2, &shuffled(50, 5), 10);

    let mut index = CancellingIndex {
        cancellation: populator.cancellation(),
        puts: 0,
    };
    let result = populator.scan_completed(&mut index).unwrap();
    assert_eq!(result, None);
    assert_eq!(index.puts, 1);
    populator.close().unwrap();
}

#[test]
fn close_deletes_part_files() {
    let dir = tempdir().unwrap();
    let mut populator =
        BlockPopulator::new(GenericLayout::new(1), dir.path(), "index", config(128, 2)).unwrap();
    fill(&mut populator, 3, &shuffled(60, 6), 10);
    populator.merge_parts().unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);

    populator.close().unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

// =============================================================================
// Test 5: Progress covers the merges of every part
// =============================================================================
#[test]
fn progress_reaches_completion() {
    let dir = tempdir().unwrap();
    let mut populator =
        BlockPopulator::new(GenericLayout::new(1), dir.path(), "index", config(128, 2)).unwrap();
    fill(&mut populator, 2, &shuffled(200, 7), 1000);
    assert_eq!(populator.progress().total, 0);

    populator.merge_parts().unwrap();
    let progress = populator.progress();
    assert!(progress.total > 0);
    assert_eq!(progress.completed, progress.total);
    assert_eq!(progress.fraction(), 1.0);
    populator.close().unwrap();
}

// =============================================================================
// Test 6: Misuse is rejected
// =============================================================================
#[test]
fn rejects_bad_parts_and_late_parts() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let mut populator =
        BlockPopulator::new(layout.clone(), dir.path(), "index", config(128, 2)).unwrap();
    let part = populator.new_part().unwrap();
    assert!(matches!(
        populator.add(part + 1, key(&layout, 1, 1), NullValue),
        Err(Error::InvalidArgument(_))
    ));
    populator.merge_parts().unwrap();
    assert!(matches!(populator.new_part(), Err(Error::IllegalState(_))));
    populator.close().unwrap();
}

#[test]
fn rejects_invalid_config() {
    let dir = tempdir().unwrap();
    for bad in [config(16, 2), config(128, 1)] {
        let result = BlockPopulator::new(GenericLayout::new(1), dir.path(), "index", bad);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}

// =============================================================================
// Test 7: Many producers feed one storage through the coalescing writer
// =============================================================================
#[test]
fn coalescing_writer_collects_all_batches() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let monitor = Arc::new(RecordingMonitor::default());
    let storage =
        BlockStorage::new(layout.clone(), &dir.path().join("coalesced"), 512, monitor.clone())
            .unwrap();
    let writer = CoalescingWriter::new(storage, 4).unwrap();

    thread::scope(|scope| {
        for producer in 0..4i64 {
            let writer = &writer;
            let layout = &layout;
            scope.spawn(move || {
                for batch in 0..10i64 {
                    let entries = (0..25)
                        .map(|i| {
                            let entity = producer * 1000 + batch * 25 + i;
                            (key(layout, entity, -entity), NullValue)
                        })
                        .collect();
                    writer.submit(entries).unwrap();
                }
            });
        }
    });

    let mut storage = writer.finish().unwrap();
    assert_eq!(storage.entry_count(), 1000);
    assert_eq!(monitor.entries_added(), 1000);
    storage.done_adding().unwrap();
    storage.merge(4, &NotCancellable).unwrap();
    assert_eq!(storage.number_of_blocks(), 1);

    let mut reader = storage.reader().unwrap();
    let mut block = reader.next_block(&mut Vec::new()).unwrap().unwrap();
    let mut keys = Vec::new();
    while block.next().unwrap() {
        keys.push(block.key().clone());
    }
    assert_eq!(keys.len(), 1000);
    assert_sorted(&layout, &keys);
    assert!(reader.next_block(&mut Vec::new()).unwrap().is_none());
    storage.close().unwrap();
}

#[test]
fn coalescing_writer_without_batches_returns_empty_storage() {
    let dir = tempdir().unwrap();
    let storage = BlockStorage::new(
        GenericLayout::new(1),
        &dir.path().join("empty"),
        128,
        Arc::new(MonitorAdapter),
    )
    .unwrap();
    let writer = CoalescingWriter::new(storage, 1).unwrap();
    let storage = writer.finish().unwrap();
    assert_eq!(storage.entry_count(), 0);
}

#[test]
fn dropping_failed_coalescing_writer_reports_instead_of_panicking() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(3);
    let storage = BlockStorage::new(
        layout.clone(),
        &dir.path().join("failed"),
        128,
        Arc::new(MonitorAdapter),
    )
    .unwrap();
    let writer = CoalescingWriter::new(storage, 1).unwrap();
    let text = "x".repeat(30_000);
    let oversized = layout
        .key_of(1, &[Value::from(text.as_str()), Value::from(text.as_str()), Value::from(text.as_str())])
        .unwrap();
    writer.submit(vec![(oversized, NullValue)]).unwrap();
    // the consumer stops on the oversized entry and drops its end of the channel
    while writer.submit(Vec::new()).is_ok() {
        thread::yield_now();
    }
    drop(writer);
}

// =============================================================================
// Test 8: Updates made during the scan are applied after the scan entries
// =============================================================================
#[test]
fn external_updates_apply_after_scan() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let mut populator =
        BlockPopulator::new(layout.clone(), dir.path(), "index", config(256, 2)).unwrap();
    let mut updater = populator.new_populating_updater().unwrap();
    fill(&mut populator, 2, &shuffled(20, 8), 1000);

    updater
        .process(IndexUpdate::Added {
            key: key(&layout, 100, 100),
            value: NullValue,
        })
        .unwrap();
    updater
        .process(IndexUpdate::Removed {
            key: key(&layout, 5, 5),
        })
        .unwrap();
    updater
        .process(IndexUpdate::Changed {
            before: key(&layout, 7, 7),
            after: key(&layout, 7, -7),
            value: NullValue,
        })
        .unwrap();
    // removing what the scan never saw is harmless
    updater
        .process(IndexUpdate::Removed {
            key: key(&layout, 500, 500),
        })
        .unwrap();
    assert_eq!(populator.external_update_count(), 4);
    assert!(dir.path().join("index.ext").exists());

    let mut index = MemoryIndex::new(&layout);
    let sample = populator.scan_completed(&mut index).unwrap().unwrap();
    assert_eq!(sample.index_size, 20);
    assert_eq!(sample.updates, 4);

    assert_sorted(&layout, &index.keys);
    let mut expected: Vec<i64> = (0..20).filter(|&e| e != 5 && e != 7).collect();
    expected.insert(0, 7);
    expected.push(100);
    assert_eq!(index.entities(), expected);

    populator.close().unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn updaters_refuse_updates_once_scan_completed() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let mut populator =
        BlockPopulator::new(layout.clone(), dir.path(), "index", config(256, 2)).unwrap();
    let mut updater = populator.new_populating_updater().unwrap();
    let mut closed = populator.new_populating_updater().unwrap();
    closed.close();
    assert!(matches!(
        closed.process(IndexUpdate::Removed {
            key: key(&layout, 1, 1)
        }),
        Err(Error::IllegalState(_))
    ));
    fill(&mut populator, 1, &shuffled(10, 9), 1000);

    populator
        .scan_completed(&mut MemoryIndex::new(&layout))
        .unwrap()
        .unwrap();
    assert!(matches!(
        updater.process(IndexUpdate::Removed {
            key: key(&layout, 1, 1)
        }),
        Err(Error::IllegalState(_))
    ));
    assert!(matches!(
        populator.new_populating_updater(),
        Err(Error::IllegalState(_))
    ));
    drop(updater);
    populator.close().unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

// =============================================================================
// Test 9: Unique populations recheck duplicates after applying updates
// =============================================================================
#[test]
fn removal_during_scan_resolves_duplicate() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let mut populator =
        BlockPopulator::new(layout.clone(), dir.path(), "unique", config(256, 2)).unwrap();
    let mut updater = populator.new_populating_updater().unwrap();
    let part = populator.new_part().unwrap();
    for (entity, value) in [(1, 100), (10, 7), (20, 7), (2, 200)] {
        populator.add(part, key(&layout, entity, value), NullValue).unwrap();
    }
    updater
        .process(IndexUpdate::Removed {
            key: key(&layout, 20, 7),
        })
        .unwrap();

    let mut index = MemoryIndex::new(&layout);
    let sample = populator.scan_completed_unique(&mut index).unwrap().unwrap();
    assert_eq!(sample.updates, 1);
    assert_eq!(index.entities(), vec![10, 1, 2]);
    populator.close().unwrap();
}

#[test]
fn update_adding_taken_value_conflicts() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let mut populator =
        BlockPopulator::new(layout.clone(), dir.path(), "unique", config(256, 2)).unwrap();
    let mut updater = populator.new_populating_updater().unwrap();
    fill(&mut populator, 2, &shuffled(30, 10), 1000);
    updater
        .process(IndexUpdate::Changed {
            before: key(&layout, 4, 4),
            after: key(&layout, 4, 40),
            value: NullValue,
        })
        .unwrap();
    updater
        .process(IndexUpdate::Added {
            key: key(&layout, 50, 3),
            value: NullValue,
        })
        .unwrap();

    match populator.scan_completed_unique(&mut MemoryIndex::new(&layout)) {
        Err(Error::Conflict {
            first_entity,
            other_entity,
            ..
        }) => assert_eq!((first_entity, other_entity), (3, 50)),
        other => panic!("expected a conflict, got {other:?}"),
    }
    populator.close().unwrap();
}

#[test]
fn update_moving_to_free_value_is_unique() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let mut populator =
        BlockPopulator::new(layout.clone(), dir.path(), "unique", config(256, 2)).unwrap();
    let mut updater = populator.new_populating_updater().unwrap();
    fill(&mut populator, 2, &shuffled(30, 11), 1000);
    // 4 leaves value 4 free, then 50 takes it
    updater
        .process(IndexUpdate::Changed {
            before: key(&layout, 4, 4),
            after: key(&layout, 4, 400),
            value: NullValue,
        })
        .unwrap();
    updater
        .process(IndexUpdate::Added {
            key: key(&layout, 50, 4),
            value: NullValue,
        })
        .unwrap();

    let mut index = MemoryIndex::new(&layout);
    populator.scan_completed_unique(&mut index).unwrap().unwrap();
    assert_eq!(index.keys.len(), 31);
    assert_eq!(index.entities_with_values(&key(&layout, 0, 4)).unwrap(), vec![50]);
    assert_eq!(index.entities_with_values(&key(&layout, 0, 400)).unwrap(), vec![4]);
    populator.close().unwrap();
}

// =============================================================================
// Test 10: The population monitor brackets scan completion
// =============================================================================
#[derive(Default)]
struct EventCounter {
    entries_added: AtomicU64,
    started: AtomicU64,
    ended: AtomicU64,
}

impl Monitor for EventCounter {
    fn entry_added(&self, _entry_size: usize) {
        self.entries_added.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

impl PopulationMonitor for EventCounter {
    fn scan_completed_started(&self) {
        self.started.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn scan_completed_ended(&self) {
        assert_eq!(self.started.load(AtomicOrdering::Relaxed), 1);
        self.ended.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

#[test]
fn monitor_sees_scan_completion_even_when_it_fails() {
    let dir = tempdir().unwrap();
    let layout = GenericLayout::new(1);
    let events = Arc::new(EventCounter::default());
    let mut populator = BlockPopulator::new(layout.clone(), dir.path(), "unique", config(256, 2))
        .unwrap()
        .with_monitor(events.clone());
    let part = populator.new_part().unwrap();
    populator.add(part, key(&layout, 1, 7), NullValue).unwrap();
    populator.add(part, key(&layout, 2, 7), NullValue).unwrap();
    assert_eq!(events.entries_added.load(AtomicOrdering::Relaxed), 2);

    let result = populator.scan_completed_unique(&mut MemoryIndex::new(&layout));
    assert!(matches!(result, Err(Error::Conflict { .. })));
    assert_eq!(events.started.load(AtomicOrdering::Relaxed), 1);
    assert_eq!(events.ended.load(AtomicOrdering::Relaxed), 1);
    populator.close().unwrap();
}
