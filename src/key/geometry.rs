//! Geometry slots: a packed CRS header, the curve value and the raw
//! coordinate bits.
//!
//! ```text
//! header (3B): ┌───────────┬──────────────┬────────────┐
//!              │ table (2b)│  code (20b)  │  dims (2b) │
//!              └───────────┴──────────────┴────────────┘
//! then:        derived value (8B) │ coordinate bits (8B each)
//! ```

use std::cmp::Ordering;

use crate::cursor::PageCursor;

pub const HEADER_SIZE: usize = 3;

const TABLE_BITS: u32 = 2;
const CODE_BITS: u32 = 20;
const DIMENSION_BITS: u32 = 2;
const TABLE_SHIFT: u32 = CODE_BITS + DIMENSION_BITS;
const CODE_SHIFT: u32 = DIMENSION_BITS;

/// Pack table id, code and dimension count into the low 24 bits.
pub fn pack_header(table_id: i64, code: i64, dimensions: usize) -> u32 {
    let table = (table_id as u32) & ((1 << TABLE_BITS) - 1);
    let code = (code as u32) & ((1 << CODE_BITS) - 1);
    let dims = (dimensions as u32) & ((1 << DIMENSION_BITS) - 1);
    (table << TABLE_SHIFT) | (code << CODE_SHIFT) | dims
}

/// Inverse of [`pack_header`]: `(table_id, code, dimensions)`.
pub fn unpack_header(header: u32) -> (i64, i64, usize) {
    let table = (header >> TABLE_SHIFT) & ((1 << TABLE_BITS) - 1);
    let code = (header >> CODE_SHIFT) & ((1 << CODE_BITS) - 1);
    let dims = header & ((1 << DIMENSION_BITS) - 1);
    (table as i64, code as i64, dims as usize)
}

pub fn put_header(cursor: &mut PageCursor, header: u32) {
    cursor.put_u8((header >> 16) as u8);
    cursor.put_u8((header >> 8) as u8);
    cursor.put_u8(header as u8);
}

pub fn get_header(cursor: &mut PageCursor) -> u32 {
    let high = cursor.get_u8() as u32;
    let mid = cursor.get_u8() as u32;
    let low = cursor.get_u8() as u32;
    (high << 16) | (mid << 8) | low
}

/// One geometry as seen by the comparison.
pub struct GeometryView<'a> {
    pub table_id: i64,
    pub code: i64,
    pub derived_value: i64,
    /// `None` for a range boundary carrying no coordinates.
    pub coordinates: Option<&'a [i64]>,
}

/// CRS, then curve value, then raw coordinate bits. A side without
/// coordinates ties on the last step so the inclusion marker decides.
pub fn compare_geometry(left: &GeometryView<'_>, right: &GeometryView<'_>) -> Ordering {
    let ordering = left
        .table_id
        .cmp(&right.table_id)
        .then(left.code.cmp(&right.code))
        .then(left.derived_value.cmp(&right.derived_value));
    if ordering != Ordering::Equal {
        return ordering;
    }
    match (left.coordinates, right.coordinates) {
        (Some(l), Some(r)) => l.cmp(r),
        _ => Ordering::Equal,
    }
}
