//! Entry encoding inside a block.
//!
//! ```text
//! fixed-size layout:  [key][value]
//! other layouts:      [key_len(2B)][value_len(2B)][key][value]
//! ```

use crate::cursor::PageCursor;
use crate::error::{Error, Result};
use crate::key::Layout;

/// Size prefix of an entry in a layout without fixed sizes.
pub const ENTRY_SIZE_PREFIX: usize = 2 + 2;

/// Encoded size of one entry.
pub fn entry_size<L: Layout>(layout: &L, key: &L::Key, value: &L::Value) -> usize {
    let size = layout.key_size(key) + layout.value_size(value);
    if layout.fixed_size() {
        size
    } else {
        ENTRY_SIZE_PREFIX + size
    }
}

/// Reject entries whose sizes do not fit the 2-byte prefix.
pub fn check_entry<L: Layout>(layout: &L, key: &L::Key, value: &L::Value) -> Result<()> {
    if layout.fixed_size() {
        return Ok(());
    }
    let key_size = layout.key_size(key);
    let value_size = layout.value_size(value);
    if key_size > u16::MAX as usize || value_size > u16::MAX as usize {
        return Err(Error::InvalidArgument(format!(
            "entry with key of {key_size} bytes and value of {value_size} bytes is too large"
        )));
    }
    Ok(())
}

pub fn write_entry<L: Layout>(cursor: &mut PageCursor, layout: &L, key: &L::Key, value: &L::Value) {
    if !layout.fixed_size() {
        cursor.put_u16(layout.key_size(key) as u16);
        cursor.put_u16(layout.value_size(value) as u16);
    }
    layout.write_key(cursor, key);
    layout.write_value(cursor, value);
}

/// Read one entry's payload once its sizes are known. The cursor must hold
/// `key_size + value_size` readable bytes.
pub fn read_entry<L: Layout>(
    cursor: &mut PageCursor,
    layout: &L,
    key: &mut L::Key,
    value: &mut L::Value,
    key_size: usize,
    value_size: usize,
) -> Result<()> {
    let start = cursor.offset();
    let key_ok = layout.read_key(cursor, key, key_size);
    cursor.check_and_clear_cursor_exception()?;
    if !key_ok || cursor.offset() != start + key_size {
        return Err(Error::Corruption(format!(
            "key at offset {start} does not decode as {key_size} bytes"
        )));
    }
    let value_ok = layout.read_value(cursor, value, value_size);
    cursor.check_and_clear_cursor_exception()?;
    if !value_ok || cursor.offset() != start + key_size + value_size {
        return Err(Error::Corruption(format!(
            "value at offset {} does not decode as {value_size} bytes",
            start + key_size
        )));
    }
    Ok(())
}
