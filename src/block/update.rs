//! Append-only log of index updates that arrive while a scan is running.
//!
//! Updates are kept in arrival order and replayed as-is, never sorted.
//!
//! ```text
//! added / removed:  [mode(1B)][key_len(2B)][value_len(2B)][key][value]
//! changed:          [mode(1B)][entry before][entry after]
//! ```
//!
//! Entries always carry the size prefix, whatever the layout. Removed and
//! the "before" side of a change carry an empty value.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::debug;

use crate::block::entry::{check_entry, read_entry};
use crate::cursor::PageCursor;
use crate::error::{Error, Result};
use crate::key::Layout;

/// Kind of a recorded update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Added,
    Removed,
    Changed,
}

impl UpdateMode {
    pub fn id(self) -> u8 {
        match self {
            UpdateMode::Added => 0,
            UpdateMode::Removed => 1,
            UpdateMode::Changed => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(UpdateMode::Added),
            1 => Some(UpdateMode::Removed),
            2 => Some(UpdateMode::Changed),
            _ => None,
        }
    }
}

/// One update to an index entry.
#[derive(Debug, Clone)]
pub enum IndexUpdate<K, V> {
    Added { key: K, value: V },
    Removed { key: K },
    /// The entry moved from `before` to `after`.
    Changed { before: K, after: K, value: V },
}

impl<K, V> IndexUpdate<K, V> {
    pub fn mode(&self) -> UpdateMode {
        match self {
            IndexUpdate::Added { .. } => UpdateMode::Added,
            IndexUpdate::Removed { .. } => UpdateMode::Removed,
            IndexUpdate::Changed { .. } => UpdateMode::Changed,
        }
    }
}

/// Writes updates to a file, to be read back in order once adding is done.
pub struct IndexUpdateStorage<L: Layout> {
    layout: L,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    cursor: PageCursor,
    /// Empty value written for removals and the old side of changes.
    empty_value: L::Value,
    count: u64,
}

impl<L: Layout> IndexUpdateStorage<L> {
    /// Create the storage, truncating any file at `path`.
    pub fn new(layout: L, path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let empty_value = layout.new_value();
        Ok(IndexUpdateStorage {
            layout,
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            cursor: PageCursor::with_capacity(256),
            empty_value,
            count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of updates added.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_done_adding(&self) -> bool {
        self.writer.is_none()
    }

    pub fn add(&mut self, update: &IndexUpdate<L::Key, L::Value>) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::IllegalState("cannot add updates after done_adding".into()))?;
        let layout = &self.layout;
        let cursor = &mut self.cursor;
        cursor.clear();
        cursor.put_u8(update.mode().id());
        match update {
            IndexUpdate::Added { key, value } => {
                check_entry(layout, key, value)?;
                put_entry(cursor, layout, key, value);
            }
            IndexUpdate::Removed { key } => {
                check_entry(layout, key, &self.empty_value)?;
                put_entry(cursor, layout, key, &self.empty_value);
            }
            IndexUpdate::Changed { before, after, value } => {
                check_entry(layout, before, &self.empty_value)?;
                check_entry(layout, after, value)?;
                put_entry(cursor, layout, before, &self.empty_value);
                put_entry(cursor, layout, after, value);
            }
        }
        writer.write_all(cursor.written())?;
        self.count += 1;
        Ok(())
    }

    /// Flush and seal the file.
    pub fn done_adding(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!(path = %self.path.display(), updates = self.count, "Sealed update storage");
        }
        Ok(())
    }

    /// Read the updates back in the order they were added.
    pub fn reader(&self) -> Result<IndexUpdateCursor<L>> {
        if !self.is_done_adding() {
            return Err(Error::IllegalState("cannot read updates before done_adding".into()));
        }
        let file = File::open(&self.path)?;
        Ok(IndexUpdateCursor {
            key: self.layout.new_key(),
            key2: self.layout.new_key(),
            value: self.layout.new_value(),
            layout: self.layout.clone(),
            input: BufReader::new(file),
            cursor: PageCursor::with_capacity(256),
            remaining: self.count,
            mode: None,
        })
    }

    /// Delete the file.
    pub fn close(mut self) -> Result<()> {
        drop(self.writer.take());
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn put_entry<L: Layout>(cursor: &mut PageCursor, layout: &L, key: &L::Key, value: &L::Value) {
    cursor.put_u16(layout.key_size(key) as u16);
    cursor.put_u16(layout.value_size(value) as u16);
    layout.write_key(cursor, key);
    layout.write_value(cursor, value);
}

/// Forward-only reader over recorded updates.
///
/// `key` is the added or removed key, or the old key of a change; `key2`
/// is the new key of a change. `value` belongs to the added or new key.
pub struct IndexUpdateCursor<L: Layout> {
    layout: L,
    input: BufReader<File>,
    cursor: PageCursor,
    remaining: u64,
    mode: Option<UpdateMode>,
    key: L::Key,
    key2: L::Key,
    value: L::Value,
}

impl<L: Layout> IndexUpdateCursor<L> {
    pub fn next(&mut self) -> Result<bool> {
        if self.remaining == 0 {
            self.mode = None;
            return Ok(false);
        }
        let id = self.input.read_u8().map_err(truncated)?;
        let mode = UpdateMode::from_id(id)
            .ok_or_else(|| Error::Corruption(format!("unknown update mode {id}")))?;
        match mode {
            UpdateMode::Added | UpdateMode::Removed => {
                self.read_entry_into(true)?;
            }
            UpdateMode::Changed => {
                self.read_entry_into(true)?;
                self.read_entry_into(false)?;
            }
        }
        self.remaining -= 1;
        self.mode = Some(mode);
        Ok(true)
    }

    /// Mode of the current update. `None` before the first and after the last.
    pub fn mode(&self) -> Option<UpdateMode> {
        self.mode
    }

    pub fn key(&self) -> &L::Key {
        &self.key
    }

    pub fn key2(&self) -> &L::Key {
        &self.key2
    }

    pub fn value(&self) -> &L::Value {
        &self.value
    }

    fn read_entry_into(&mut self, first: bool) -> Result<()> {
        let key_size = self.input.read_u16::<BigEndian>().map_err(truncated)? as usize;
        let value_size = self.input.read_u16::<BigEndian>().map_err(truncated)? as usize;
        let size = key_size + value_size;
        self.cursor.clear();
        self.cursor.ensure_capacity(size);
        self.input
            .read_exact(&mut self.cursor.spare_mut()[..size])
            .map_err(truncated)?;
        self.cursor.advance_limit(size);
        let key = if first { &mut self.key } else { &mut self.key2 };
        read_entry(
            &mut self.cursor,
            &self.layout,
            key,
            &mut self.value,
            key_size,
            value_size,
        )
    }
}

fn truncated(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Corruption("update storage ends inside an update".into())
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{GenericLayout, NullValue, Value};
    use tempfile::tempdir;

    #[test]
    fn mode_ids_roundtrip() {
        for mode in [UpdateMode::Added, UpdateMode::Removed, UpdateMode::Changed] {
            assert_eq!(UpdateMode::from_id(mode.id()), Some(mode));
        }
        assert_eq!(UpdateMode::from_id(3), None);
    }

    #[test]
    fn updates_read_back_in_order() {
        let dir = tempdir().unwrap();
        let layout = GenericLayout::new(1);
        let key = |entity, value: &str| layout.key_of(entity, &[Value::from(value)]).unwrap();
        let mut storage = IndexUpdateStorage::new(layout.clone(), &dir.path().join("ext")).unwrap();
        storage
            .add(&IndexUpdate::Added { key: key(3, "c"), value: NullValue })
            .unwrap();
        storage.add(&IndexUpdate::Removed { key: key(1, "a") }).unwrap();
        storage
            .add(&IndexUpdate::Changed {
                before: key(2, "b"),
                after: key(2, "bb"),
                value: NullValue,
            })
            .unwrap();
        assert!(matches!(storage.reader(), Err(Error::IllegalState(_))));
        storage.done_adding().unwrap();
        assert_eq!(storage.count(), 3);

        let mut updates = storage.reader().unwrap();
        assert_eq!(updates.mode(), None);
        assert!(updates.next().unwrap());
        assert_eq!(updates.mode(), Some(UpdateMode::Added));
        assert_eq!(updates.key().to_string(), key(3, "c").to_string());
        assert!(updates.next().unwrap());
        assert_eq!(updates.mode(), Some(UpdateMode::Removed));
        assert_eq!(updates.key().entity_id(), 1);
        assert!(updates.next().unwrap());
        assert_eq!(updates.mode(), Some(UpdateMode::Changed));
        assert_eq!(updates.key().to_string(), key(2, "b").to_string());
        assert_eq!(updates.key2().to_string(), key(2, "bb").to_string());
        assert!(!updates.next().unwrap());
        assert_eq!(updates.mode(), None);

        assert!(matches!(
            storage.add(&IndexUpdate::Removed { key: key(4, "d") }),
            Err(Error::IllegalState(_))
        ));
        let path = storage.path().to_path_buf();
        storage.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn truncated_file_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ext");
        let layout = GenericLayout::new(1);
        let mut storage = IndexUpdateStorage::new(layout.clone(), &path).unwrap();
        let key = layout.key_of(1, &[Value::Int64(5)]).unwrap();
        storage.add(&IndexUpdate::Removed { key }).unwrap();
        storage.done_adding().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        let mut updates = storage.reader().unwrap();
        assert!(matches!(updates.next(), Err(Error::Corruption(_))));
    }
}
