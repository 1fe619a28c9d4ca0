// Block merge: multi-pass k-way merge of sorted blocks.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{monitored_storage, random_entries, read_blocks, storage};
use native_index::block::{
    BlockHeader, CloseCancellation, NotCancellable, RecordingMonitor,
    calculate_number_of_entries_written_during_merges,
};
use native_index::error::Error;
use tempfile::tempdir;

fn assert_sorted(entries: &[(i64, i64)]) {
    for pair in entries.windows(2) {
        assert!(pair[0].0 <= pair[1].0, "{:?} before {:?}", pair[0], pair[1]);
    }
}

// =============================================================================
// Test 1: Any merge factor ends with one sorted block of every entry
// =============================================================================
#[test]
fn merge_sorts_everything_into_one_block() {
    for merge_factor in [2, 3, 8] {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks");
        let mut storage = storage(&path, 256);
        let entries = random_entries(merge_factor as u64, 500);
        for &(key, value) in &entries {
            storage.add(key, value).unwrap();
        }
        storage.done_adding().unwrap();
        assert!(storage.number_of_blocks() > 8);

        storage.merge(merge_factor, &NotCancellable).unwrap();

        assert_eq!(storage.number_of_blocks(), 1);
        let blocks = read_blocks(&storage);
        assert_eq!(blocks.len(), 1);
        let merged = &blocks[0];
        assert_eq!(merged.len(), entries.len());
        assert_sorted(merged);

        let mut expected = entries.clone();
        expected.sort();
        let mut actual = merged.clone();
        actual.sort();
        assert_eq!(actual, expected, "merge factor {merge_factor}");
    }
}

// =============================================================================
// Test 2: File size equals the declared size of the single block
// =============================================================================
#[test]
fn merged_file_is_one_declared_block() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blocks");
    let mut storage = storage(&path, 64);
    for (key, value) in random_entries(7, 40) {
        storage.add(key, value).unwrap();
    }
    storage.done_adding().unwrap();
    storage.merge(3, &NotCancellable).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let header = BlockHeader::decode(&bytes, bytes.len() as u64).unwrap();
    assert_eq!(header.block_size, bytes.len() as u64);
    assert_eq!(header.entry_count, 40);
}

// =============================================================================
// Test 3: 9 single-entry blocks, merge factor 4 → 9 → 3 → 1
// =============================================================================
#[test]
fn passes_shrink_block_count_by_merge_factor() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blocks");
    let monitor = Arc::new(RecordingMonitor::default());
    // room for exactly one 16 byte entry per block
    let mut storage = monitored_storage(&path, 32, monitor.clone());
    for key in (0..9).rev() {
        storage.add(key, key).unwrap();
    }
    storage.done_adding().unwrap();
    assert_eq!(storage.number_of_blocks(), 9);

    storage.merge(4, &NotCancellable).unwrap();

    assert_eq!(monitor.merge_iterations(), 2);
    assert_eq!(monitor.total_entries_to_merge(), 18);
    assert_eq!(monitor.total_entries_merged(), 18);
    let blocks = read_blocks(&storage);
    assert_eq!(blocks[0].iter().map(|e| e.0).collect::<Vec<_>>(), (0..9).collect::<Vec<_>>());
}

// =============================================================================
// Test 4: Predicted entry writes match what the merge reports
// =============================================================================
#[test]
fn predicted_writes_match_reported() {
    for (count, merge_factor) in [(100, 2), (333, 3), (1000, 8), (17, 16)] {
        let dir = tempdir().unwrap();
        let monitor = Arc::new(RecordingMonitor::default());
        let mut storage = monitored_storage(&dir.path().join("blocks"), 128, monitor.clone());
        for (key, value) in random_entries(count as u64, count) {
            storage.add(key, value).unwrap();
        }
        storage.done_adding().unwrap();
        let predicted = calculate_number_of_entries_written_during_merges(
            storage.entry_count(),
            storage.number_of_blocks(),
            merge_factor,
        );

        storage.merge(merge_factor, &NotCancellable).unwrap();

        assert_eq!(monitor.total_entries_to_merge(), predicted);
        assert_eq!(monitor.total_entries_merged(), predicted);
    }
}

// =============================================================================
// Test 5: Scratch file is gone after a merge, whichever side held the result
// =============================================================================
#[test]
fn merge_leaves_only_the_stable_file() {
    // one pass (odd) and two passes (even)
    for entries in [4, 9] {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks");
        let mut storage = storage(&path, 32);
        for key in 0..entries {
            storage.add(key, key).unwrap();
        }
        storage.done_adding().unwrap();
        storage.merge(4, &NotCancellable).unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1, "{entries} entries");
        assert!(path.exists());
    }
}

// =============================================================================
// Test 6: A single block needs no merging
// =============================================================================
#[test]
fn single_block_merge_is_a_no_op() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blocks");
    let monitor = Arc::new(RecordingMonitor::default());
    let mut storage = monitored_storage(&path, 1024, monitor.clone());
    storage.add(2, 0).unwrap();
    storage.add(1, 0).unwrap();
    storage.done_adding().unwrap();
    let before = std::fs::read(&path).unwrap();

    storage.merge(2, &NotCancellable).unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(monitor.merge_iterations(), 0);
    assert_eq!(monitor.total_entries_to_merge(), 0);
}

// =============================================================================
// Test 7: Cancelled merge leaves a readable file with every entry
// =============================================================================
#[test]
fn cancelled_merge_leaves_valid_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blocks");
    let mut storage = storage(&path, 32);
    for key in 0..16 {
        storage.add(key, key).unwrap();
    }
    storage.done_adding().unwrap();

    // allow the first pass's checks through, then cancel
    let checks = AtomicUsize::new(0);
    let cancel_after_first_pass = move || checks.fetch_add(1, Ordering::Relaxed) >= 9;
    storage.merge(2, &cancel_after_first_pass).unwrap();

    assert_eq!(storage.number_of_blocks(), 8);
    let blocks = read_blocks(&storage);
    assert_eq!(blocks.len(), 8);
    assert_eq!(blocks.iter().map(Vec::len).sum::<usize>(), 16);
    for block in &blocks {
        assert_sorted(block);
    }
    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
}

#[test]
fn cancelled_inside_second_pass_keeps_first_pass_output() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blocks");
    let mut storage = storage(&path, 32);
    for key in (0..16).rev() {
        storage.add(key, key).unwrap();
    }
    storage.done_adding().unwrap();

    // pass 1 lives in the scratch file; pass 2 gets two groups into the
    // stable path before the cancel, so that partial output must go
    let checks = AtomicUsize::new(0);
    let cancel_inside_second_pass = move || checks.fetch_add(1, Ordering::Relaxed) >= 12;
    storage.merge(2, &cancel_inside_second_pass).unwrap();

    assert_eq!(storage.number_of_blocks(), 8);
    let blocks = read_blocks(&storage);
    assert_eq!(blocks.len(), 8);
    for block in &blocks {
        assert_eq!(block.len(), 2);
        assert_sorted(block);
    }
    let mut keys: Vec<i64> = blocks.iter().flatten().map(|&(key, _)| key).collect();
    keys.sort_unstable();
    assert_eq!(keys, (0..16).collect::<Vec<_>>());

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files, vec![path.clone()]);
    assert!(!dir.path().join("blocks.merge").exists());
}

#[test]
fn cancelled_before_start_changes_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blocks");
    let mut storage = storage(&path, 32);
    for key in 0..4 {
        storage.add(key, key).unwrap();
    }
    storage.done_adding().unwrap();

    let cancellation = CloseCancellation::default();
    cancellation.cancel();
    storage.merge(2, &cancellation).unwrap();

    assert_eq!(storage.number_of_blocks(), 4);
    assert_eq!(read_blocks(&storage).len(), 4);
}

// =============================================================================
// Test 8: Bad merge calls
// =============================================================================
#[test]
fn merge_requires_done_adding_and_sane_factor() {
    let dir = tempdir().unwrap();
    let mut storage = storage(&dir.path().join("blocks"), 64);
    storage.add(1, 1).unwrap();
    assert!(matches!(
        storage.merge(2, &NotCancellable),
        Err(Error::IllegalState(_))
    ));
    storage.done_adding().unwrap();
    assert!(matches!(
        storage.merge(1, &NotCancellable),
        Err(Error::InvalidArgument(_))
    ));
}
