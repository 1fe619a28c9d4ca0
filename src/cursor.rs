//! A growable byte page with a read/write offset.
//!
//! Keys and block entries are encoded through a `PageCursor`. All multi-byte
//! values are big-endian. Reads never panic: reading past the written limit
//! yields zero and records a cursor exception which the caller checks once
//! the whole key has been read.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct PageCursor {
    data: Vec<u8>,
    offset: usize,
    /// End of valid bytes. Reads stop here, writes extend it.
    limit: usize,
    exception: Option<String>,
}

impl PageCursor {
    /// Create an empty cursor with `capacity` bytes preallocated.
    pub fn with_capacity(capacity: usize) -> Self {
        PageCursor {
            data: vec![0u8; capacity],
            offset: 0,
            limit: 0,
            exception: None,
        }
    }

    /// Wrap already encoded bytes for reading.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let limit = data.len();
        PageCursor {
            data,
            offset: 0,
            limit,
            exception: None,
        }
    }

    /// Give the backing buffer back so it can be reused.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Forget all content and any pending exception. Capacity is kept.
    pub fn clear(&mut self) {
        self.offset = 0;
        self.limit = 0;
        self.exception = None;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Move the offset, clamped to the valid region.
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset.min(self.limit);
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes left to read before the limit.
    pub fn remaining(&self) -> usize {
        self.limit - self.offset
    }

    /// Every byte written so far.
    pub fn written(&self) -> &[u8] {
        &self.data[..self.limit]
    }

    /// Move unread bytes to the front so more can be appended after them.
    pub fn compact(&mut self) {
        self.data.copy_within(self.offset..self.limit, 0);
        self.limit -= self.offset;
        self.offset = 0;
    }

    /// Grow the backing buffer so at least `capacity` bytes fit.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if self.data.len() < capacity {
            self.data.resize(capacity, 0);
        }
    }

    /// Writable spare room after the limit, for filling straight from a reader.
    /// Call [`PageCursor::advance_limit`] with the number of bytes filled.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.limit..]
    }

    pub fn advance_limit(&mut self, filled: usize) {
        self.limit = (self.limit + filled).min(self.data.len());
    }

    // --- Fault slot ---

    /// Record a decode fault. The first fault wins.
    pub fn set_cursor_exception(&mut self, message: impl Into<String>) {
        if self.exception.is_none() {
            self.exception = Some(message.into());
        }
    }

    pub fn has_cursor_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Surface a recorded fault as `Error::Corruption` and reset the slot.
    pub fn check_and_clear_cursor_exception(&mut self) -> Result<()> {
        match self.exception.take() {
            Some(message) => Err(Error::Corruption(message)),
            None => Ok(()),
        }
    }

    // --- Writes ---

    fn reserve_write(&mut self, len: usize) -> usize {
        let start = self.offset;
        self.ensure_capacity(start + len);
        self.offset += len;
        self.limit = self.limit.max(self.offset);
        start
    }

    pub fn put_u8(&mut self, value: u8) {
        let at = self.reserve_write(1);
        self.data[at] = value;
    }

    pub fn put_i8(&mut self, value: i8) {
        self.put_u8(value as u8);
    }

    pub fn put_u16(&mut self, value: u16) {
        let at = self.reserve_write(2);
        BigEndian::write_u16(&mut self.data[at..at + 2], value);
    }

    pub fn put_i16(&mut self, value: i16) {
        let at = self.reserve_write(2);
        BigEndian::write_i16(&mut self.data[at..at + 2], value);
    }

    pub fn put_i32(&mut self, value: i32) {
        let at = self.reserve_write(4);
        BigEndian::write_i32(&mut self.data[at..at + 4], value);
    }

    pub fn put_i64(&mut self, value: i64) {
        let at = self.reserve_write(8);
        BigEndian::write_i64(&mut self.data[at..at + 8], value);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        let at = self.reserve_write(bytes.len());
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Append `len` zero bytes.
    pub fn put_zeros(&mut self, len: usize) {
        let at = self.reserve_write(len);
        self.data[at..at + len].fill(0);
    }

    // --- Reads ---

    /// Claim `len` readable bytes, or record a fault and return `None`.
    fn reserve_read(&mut self, len: usize) -> Option<usize> {
        if self.remaining() < len {
            self.set_cursor_exception(format!(
                "read of {} bytes at offset {} exceeds limit {}",
                len, self.offset, self.limit
            ));
            self.offset = self.limit;
            return None;
        }
        let start = self.offset;
        self.offset += len;
        Some(start)
    }

    pub fn get_u8(&mut self) -> u8 {
        match self.reserve_read(1) {
            Some(at) => self.data[at],
            None => 0,
        }
    }

    pub fn get_i8(&mut self) -> i8 {
        self.get_u8() as i8
    }

    pub fn get_u16(&mut self) -> u16 {
        match self.reserve_read(2) {
            Some(at) => BigEndian::read_u16(&self.data[at..at + 2]),
            None => 0,
        }
    }

    pub fn get_i16(&mut self) -> i16 {
        match self.reserve_read(2) {
            Some(at) => BigEndian::read_i16(&self.data[at..at + 2]),
            None => 0,
        }
    }

    pub fn get_i32(&mut self) -> i32 {
        match self.reserve_read(4) {
            Some(at) => BigEndian::read_i32(&self.data[at..at + 4]),
            None => 0,
        }
    }

    pub fn get_i64(&mut self) -> i64 {
        match self.reserve_read(8) {
            Some(at) => BigEndian::read_i64(&self.data[at..at + 8]),
            None => 0,
        }
    }

    /// Fill `into` from the cursor. On a short read `into` is zeroed.
    pub fn get_bytes(&mut self, into: &mut [u8]) {
        match self.reserve_read(into.len()) {
            Some(at) => into.copy_from_slice(&self.data[at..at + into.len()]),
            None => into.fill(0),
        }
    }
}
