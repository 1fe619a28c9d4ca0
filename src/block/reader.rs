use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::block::BlockEntryCursor;
use crate::block::entry::{ENTRY_SIZE_PREFIX, read_entry};
use crate::block::header::BlockHeader;
use crate::cursor::PageCursor;
use crate::error::{Error, Result};
use crate::key::Layout;

/// Walks the blocks of a block file, handing out one entry reader per block.
///
/// Only headers are read here. The reader skips ahead by each block's
/// declared size, so padding after the entries is never looked at.
pub struct BlockReader<L: Layout> {
    layout: L,
    path: PathBuf,
    file: File,
    file_size: u64,
    /// Offset of the next block header.
    position: u64,
}

impl<L: Layout> BlockReader<L> {
    pub fn open(layout: L, path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(BlockReader {
            layout,
            path: path.to_path_buf(),
            file,
            file_size,
            position: 0,
        })
    }

    /// Open the next block, moving `buffer` into its entry reader. At end
    /// of file returns `None` and leaves `buffer` alone.
    pub fn next_block(&mut self, buffer: &mut Vec<u8>) -> Result<Option<BlockEntryReader<L>>> {
        if self.position >= self.file_size {
            return Ok(None);
        }
        let available = self.file_size - self.position;
        if available < BlockHeader::SIZE as u64 {
            return Err(Error::Corruption(format!(
                "{available} trailing bytes at offset {} in {}",
                self.position,
                self.path.display()
            )));
        }
        let mut header_bytes = [0u8; BlockHeader::SIZE];
        self.file.seek(SeekFrom::Start(self.position))?;
        self.file.read_exact(&mut header_bytes)?;
        let header = BlockHeader::decode(&header_bytes, available)?;

        let reader = BlockEntryReader::open(
            self.layout.clone(),
            &self.path,
            self.position,
            header,
            std::mem::take(buffer),
        )?;
        self.position += header.block_size;
        Ok(Some(reader))
    }
}

/// Sequential reader over the entries of one block.
///
/// Owns its own file handle and a reusable buffer. The current key and
/// value are overwritten by every call to `next`; copy them to keep them.
pub struct BlockEntryReader<L: Layout> {
    layout: L,
    file: File,
    cursor: PageCursor,
    /// Block bytes not yet pulled into the cursor.
    unread: u64,
    header: BlockHeader,
    read_entries: u64,
    key: L::Key,
    value: L::Value,
}

impl<L: Layout> BlockEntryReader<L> {
    fn open(
        layout: L,
        path: &Path,
        block_start: u64,
        header: BlockHeader,
        buffer: Vec<u8>,
    ) -> Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(block_start + BlockHeader::SIZE as u64))?;
        let mut cursor = PageCursor::from_bytes(buffer);
        cursor.clear();
        let key = layout.new_key();
        let value = layout.new_value();
        Ok(BlockEntryReader {
            layout,
            file,
            cursor,
            unread: header.block_size - BlockHeader::SIZE as u64,
            header,
            read_entries: 0,
            key,
            value,
        })
    }

    /// Declared size of the block, header and padding included.
    pub fn block_size(&self) -> u64 {
        self.header.block_size
    }

    pub fn entry_count(&self) -> u64 {
        self.header.entry_count
    }

    /// Hand the read buffer back for reuse.
    pub fn into_buffer(self) -> Vec<u8> {
        self.cursor.into_inner()
    }

    /// Make sure `needed` unread bytes sit in the cursor.
    fn fill(&mut self, needed: usize) -> Result<()> {
        if self.cursor.remaining() >= needed {
            return Ok(());
        }
        self.cursor.compact();
        self.cursor.ensure_capacity(needed);
        while self.cursor.remaining() < needed {
            let spare = self.cursor.spare_mut();
            let want = (spare.len() as u64).min(self.unread) as usize;
            if want == 0 {
                return Err(Error::Corruption(format!(
                    "block ends inside entry {} of {}",
                    self.read_entries, self.header.entry_count
                )));
            }
            let n = self.file.read(&mut spare[..want])?;
            if n == 0 {
                return Err(Error::Corruption("block file truncated".into()));
            }
            self.cursor.advance_limit(n);
            self.unread -= n as u64;
        }
        Ok(())
    }
}

impl<L: Layout> BlockEntryCursor<L::Key, L::Value> for BlockEntryReader<L> {
    fn next(&mut self) -> Result<bool> {
        if self.read_entries >= self.header.entry_count {
            return Ok(false);
        }
        let (key_size, value_size) = if self.layout.fixed_size() {
            (
                self.layout.key_size(&self.key),
                self.layout.value_size(&self.value),
            )
        } else {
            self.fill(ENTRY_SIZE_PREFIX)?;
            (
                self.cursor.get_u16() as usize,
                self.cursor.get_u16() as usize,
            )
        };
        self.fill(key_size + value_size)?;
        read_entry(
            &mut self.cursor,
            &self.layout,
            &mut self.key,
            &mut self.value,
            key_size,
            value_size,
        )?;
        self.read_entries += 1;
        Ok(true)
    }

    fn key(&self) -> &L::Key {
        &self.key
    }

    fn value(&self) -> &L::Value {
        &self.value
    }
}
