use byteorder::{BigEndian, ByteOrder};

use crate::cursor::PageCursor;
use crate::error::{Error, Result};

/// Header in front of every block of a block file.
///
/// ```text
/// ┌──────────────────────────────┐
/// │ Block size incl. header (8B) │
/// │ Entry count (8B)             │
/// ├──────────────────────────────┤
/// │ Entries ...                  │
/// │ Zero padding (merged blocks) │
/// └──────────────────────────────┘
/// ```
///
/// The block size is what a reader skips to reach the next block, so a
/// merged block may declare more bytes than its entries use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_size: u64,
    pub entry_count: u64,
}

impl BlockHeader {
    /// Size of the header in bytes (fixed).
    pub const SIZE: usize = 8 * 2;

    pub fn write(&self, cursor: &mut PageCursor) {
        cursor.put_i64(self.block_size as i64);
        cursor.put_i64(self.entry_count as i64);
    }

    /// Decode and validate a header. `available` is the number of file
    /// bytes from the header start to the end of the file.
    pub fn decode(data: &[u8], available: u64) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("block header too short".into()));
        }
        let block_size = BigEndian::read_i64(&data[0..8]);
        let entry_count = BigEndian::read_i64(&data[8..16]);

        if block_size < Self::SIZE as i64 || block_size as u64 > available {
            return Err(Error::Corruption(format!(
                "bad block size {block_size}, {available} bytes left in file"
            )));
        }
        if entry_count < 0 {
            return Err(Error::Corruption(format!("bad entry count {entry_count}")));
        }
        Ok(BlockHeader {
            block_size: block_size as u64,
            entry_count: entry_count as u64,
        })
    }
}
