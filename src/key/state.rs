//! The mutable state behind one key slot.
//!
//! A `KeyState` is reused for every value it holds. The meaning of its
//! scalar fields depends on the category:
//!
//! ```text
//! ┌────────────────┬──────────────────┬──────────────┬──────────────┬──────────────┐
//! │ category       │ long0            │ long1        │ long2        │ long3        │
//! ├────────────────┼──────────────────┼──────────────┼──────────────┼──────────────┤
//! │ zoned datetime │ epoch second     │ nano         │ zone id / -1 │ offset secs  │
//! │ local datetime │ epoch second     │ nano         │              │              │
//! │ date           │ epoch day        │              │              │              │
//! │ zoned time     │ nanos of day UTC │ offset secs  │              │              │
//! │ local time     │ nano of day      │              │              │              │
//! │ duration       │ avg total secs   │ nanos        │ months       │ days         │
//! │ text           │ byte length      │ char marker  │ ignore length│ highest      │
//! │ boolean        │ 0 / 1            │              │              │              │
//! │ number         │ raw bits         │ subtype      │              │              │
//! │ geometry       │ derived value    │ crs table    │ crs code     │ dimensions   │
//! └────────────────┴──────────────────┴──────────────┴──────────────┴──────────────┘
//! ```
//!
//! Arrays keep one element per index in `long0_array..long3_array` with the
//! same meanings. Text elements live in `bytes_array` (lengths in
//! `long0_array`). Number arrays share one subtype in `long1`; geometry arrays
//! share the CRS in `long1..long3` and keep coordinates flattened in
//! `long1_array`, which also holds the coordinates of a single geometry.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::cursor::PageCursor;
use crate::curve::{CoordinateReferenceSystem, SpaceFillingCurveSettings};
use crate::error::{Error, Result};
use crate::key::geometry::{self, GeometryView};
use crate::key::number::{self, NumberType};
use crate::key::temporal::{self, ZonedDateTimeFields};
use crate::key::text;
use crate::key::value::{
    ArrayValue, DateTime, Duration, LocalDateTime, Point, Time, Value, Zone,
};
use crate::key::{KeyType, MAX_ARRAY_LENGTH, MAX_TEXT_LENGTH, TYPE_ID_SIZE};
use crate::types::Inclusion;

/// High bit of the on-disk text length marks a single character.
const CHAR_MARKER: u16 = 0x8000;
const TEXT_HEADER_SIZE: usize = 2;
const ARRAY_LENGTH_SIZE: usize = 2;
const NUMBER_TYPE_SIZE: usize = 1;

const TRUE: i64 = 1;
const FALSE: i64 = 0;

#[derive(Debug, Clone)]
pub struct KeyState {
    key_type: Option<KeyType>,
    inclusion: Inclusion,

    long0: i64,
    long1: i64,
    long2: i64,
    long3: i64,
    /// Text payload, valid up to `long0`. Grown with headroom, never shrunk.
    bytes: Vec<u8>,

    array_length: usize,
    is_highest_array: bool,
    long0_array: Vec<i64>,
    long1_array: Vec<i64>,
    long2_array: Vec<i64>,
    long3_array: Vec<i64>,
    bytes_array: Vec<Vec<u8>>,

    /// Geometry range boundary: carries a curve value but no point.
    no_coordinates: bool,
    curves: Arc<SpaceFillingCurveSettings>,
}

impl Default for KeyState {
    fn default() -> Self {
        KeyState::new(Arc::new(SpaceFillingCurveSettings::default()))
    }
}

impl KeyState {
    pub fn new(curves: Arc<SpaceFillingCurveSettings>) -> Self {
        KeyState {
            key_type: None,
            inclusion: Inclusion::Neutral,
            long0: 0,
            long1: 0,
            long2: 0,
            long3: 0,
            bytes: Vec::new(),
            array_length: 0,
            is_highest_array: false,
            long0_array: Vec::new(),
            long1_array: Vec::new(),
            long2_array: Vec::new(),
            long3_array: Vec::new(),
            bytes_array: Vec::new(),
            no_coordinates: false,
            curves,
        }
    }

    pub fn key_type(&self) -> Option<KeyType> {
        self.key_type
    }

    pub fn inclusion(&self) -> Inclusion {
        self.inclusion
    }

    /// Number of elements when holding an array.
    pub fn array_length(&self) -> usize {
        self.array_length
    }

    /// Reset to "no value". Buffers are kept for reuse.
    pub fn clear(&mut self) {
        self.key_type = None;
        self.inclusion = Inclusion::Neutral;
        self.long0 = 0;
        self.long1 = 0;
        self.long2 = 0;
        self.long3 = 0;
        self.array_length = 0;
        self.is_highest_array = false;
        self.no_coordinates = false;
    }

    /// Deep copy of `other`, reusing this state's buffers.
    pub fn copy_from(&mut self, other: &KeyState) {
        self.key_type = other.key_type;
        self.inclusion = other.inclusion;
        if other.key_type == Some(KeyType::Text) {
            self.set_text_bytes(other.text_bytes());
        }
        self.long0 = other.long0;
        self.long1 = other.long1;
        self.long2 = other.long2;
        self.long3 = other.long3;
        self.array_length = other.array_length;
        self.is_highest_array = other.is_highest_array;
        self.long0_array.clone_from(&other.long0_array);
        self.long1_array.clone_from(&other.long1_array);
        self.long2_array.clone_from(&other.long2_array);
        self.long3_array.clone_from(&other.long3_array);
        self.bytes_array.clone_from(&other.bytes_array);
        self.no_coordinates = other.no_coordinates;
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Replace the state with `value`.
    pub fn write_value(&mut self, value: &Value, inclusion: Inclusion) -> Result<()> {
        self.clear();
        match value {
            Value::Bool(v) => self.write_simple(KeyType::Boolean, [*v as i64, 0, 0, 0]),
            Value::Int8(v) => self.write_number(*v as i64, NumberType::Int8),
            Value::Int16(v) => self.write_number(*v as i64, NumberType::Int16),
            Value::Int32(v) => self.write_number(*v as i64, NumberType::Int32),
            Value::Int64(v) => self.write_number(*v, NumberType::Int64),
            Value::Float32(v) => self.write_number(number::f32_bits(*v), NumberType::Float32),
            Value::Float64(v) => self.write_number(number::f64_bits(*v), NumberType::Float64),
            Value::Text(v) => self.write_text(v.as_bytes(), false)?,
            Value::Char(v) => self.write_text(v.encode_utf8(&mut [0; 4]).as_bytes(), true)?,
            Value::Date(v) => self.write_simple(KeyType::Date, [*v, 0, 0, 0]),
            Value::LocalTime(v) => self.write_simple(KeyType::LocalTime, [*v, 0, 0, 0]),
            Value::Time(v) => self.write_simple(KeyType::ZonedTime, time_fields(v)),
            Value::LocalDateTime(v) => {
                self.write_simple(KeyType::LocalDateTime, local_date_time_fields(v))
            }
            Value::DateTime(v) => self.write_simple(KeyType::ZonedDateTime, date_time_fields(v)),
            Value::Duration(v) => self.write_simple(KeyType::Duration, duration_fields(v)),
            Value::Point(v) => self.write_point(v)?,
            Value::Array(v) => self.write_array(v)?,
        }
        self.inclusion = inclusion;
        Ok(())
    }

    /// Lowest possible key of a category, or of all categories for `None`.
    pub fn init_value_as_lowest(&mut self, key_type: Option<KeyType>) {
        self.init_sentinel(key_type.unwrap_or(KeyType::LOWEST), false);
    }

    /// Highest possible key of a category, or of all categories for `None`.
    pub fn init_value_as_highest(&mut self, key_type: Option<KeyType>) {
        self.init_sentinel(key_type.unwrap_or(KeyType::HIGHEST), true);
    }

    fn init_sentinel(&mut self, key_type: KeyType, highest: bool) {
        self.clear();
        self.key_type = Some(key_type);
        self.inclusion = if highest {
            Inclusion::High
        } else {
            Inclusion::Low
        };
        if key_type.is_array() {
            // empty array sorts first, the flag sorts last
            self.is_highest_array = highest;
            if key_type == KeyType::NumberArray {
                self.long1 = NumberType::Float64.id();
            }
            return;
        }
        let extreme = if highest { i64::MAX } else { i64::MIN };
        match key_type {
            KeyType::Text => self.long3 = if highest { TRUE } else { FALSE },
            KeyType::Boolean => self.long0 = if highest { TRUE } else { FALSE },
            KeyType::Number => {
                let bound = if highest { f64::NAN } else { f64::NEG_INFINITY };
                self.long0 = number::f64_bits(bound);
                self.long1 = NumberType::Float64.id();
            }
            KeyType::Geometry => {
                self.long0 = extreme;
                self.long1 = extreme;
                self.long2 = extreme;
                self.no_coordinates = true;
            }
            _ => {
                self.long0 = extreme;
                self.long1 = extreme;
                self.long2 = extreme;
                self.long3 = extreme;
            }
        }
    }

    /// Seek key placed before every text starting with `prefix`.
    pub fn init_as_prefix_low(&mut self, prefix: &str) -> Result<()> {
        self.init_as_prefix(prefix, Inclusion::Low)
    }

    /// Seek key placed after every text starting with `prefix`.
    pub fn init_as_prefix_high(&mut self, prefix: &str) -> Result<()> {
        self.init_as_prefix(prefix, Inclusion::High)
    }

    fn init_as_prefix(&mut self, prefix: &str, inclusion: Inclusion) -> Result<()> {
        self.clear();
        self.write_text(prefix.as_bytes(), false)?;
        // the low side keeps comparing by length so shorter texts stay below it
        if inclusion == Inclusion::High {
            self.long2 = TRUE;
        }
        self.inclusion = inclusion;
        Ok(())
    }

    /// Geometry range boundary: a curve value with no point behind it. It
    /// ties with every point of that value, so the inclusion must place it.
    pub fn init_geometry_boundary(
        &mut self,
        crs: CoordinateReferenceSystem,
        derived_value: i64,
        inclusion: Inclusion,
    ) -> Result<()> {
        if inclusion == Inclusion::Neutral {
            return Err(Error::InvalidArgument(
                "geometry range boundary needs a low or high inclusion".into(),
            ));
        }
        self.clear();
        self.key_type = Some(KeyType::Geometry);
        self.long0 = derived_value;
        self.long1 = crs.table_id() as i64;
        self.long2 = crs.code() as i64;
        self.long3 = crs.dimensions() as i64;
        self.no_coordinates = true;
        self.inclusion = inclusion;
        Ok(())
    }

    fn write_simple(&mut self, key_type: KeyType, fields: [i64; 4]) {
        self.key_type = Some(key_type);
        [self.long0, self.long1, self.long2, self.long3] = fields;
    }

    fn write_number(&mut self, bits: i64, number_type: NumberType) {
        self.key_type = Some(KeyType::Number);
        self.long0 = bits;
        self.long1 = number_type.id();
    }

    fn write_text(&mut self, bytes: &[u8], is_char: bool) -> Result<()> {
        check_text_length(bytes)?;
        self.key_type = Some(KeyType::Text);
        self.set_text_bytes(bytes);
        self.long1 = if is_char { TRUE } else { FALSE };
        Ok(())
    }

    fn set_text_bytes(&mut self, bytes: &[u8]) {
        grow_with_headroom(&mut self.bytes, bytes.len());
        self.bytes[..bytes.len()].copy_from_slice(bytes);
        self.long0 = bytes.len() as i64;
    }

    fn write_point(&mut self, point: &Point) -> Result<()> {
        let dims = check_point(point, point.crs)?;
        self.key_type = Some(KeyType::Geometry);
        self.long0 = self.curves.derived_value_for(point.crs, &point.coordinates);
        self.set_crs(point.crs);
        if self.long1_array.len() < dims {
            self.long1_array.resize(dims, 0);
        }
        for (d, coordinate) in point.coordinates.iter().enumerate() {
            self.long1_array[d] = number::f64_bits(*coordinate);
        }
        Ok(())
    }

    fn set_crs(&mut self, crs: CoordinateReferenceSystem) {
        self.long1 = crs.table_id() as i64;
        self.long2 = crs.code() as i64;
        self.long3 = crs.dimensions() as i64;
    }

    fn write_array(&mut self, array: &ArrayValue) -> Result<()> {
        let length = array.len();
        if length > MAX_ARRAY_LENGTH {
            return Err(Error::InvalidArgument(format!(
                "array of {length} elements exceeds the maximum of {MAX_ARRAY_LENGTH}"
            )));
        }
        self.key_type = Some(array.key_type());
        self.begin_array(length);
        match array {
            ArrayValue::Bool(v) => {
                self.write_elements(v.iter().map(|&b| [b as i64, 0, 0, 0]));
            }
            ArrayValue::Int8(v) => {
                self.write_number_array(v.iter().map(|&n| n as i64), NumberType::Int8);
            }
            ArrayValue::Int16(v) => {
                self.write_number_array(v.iter().map(|&n| n as i64), NumberType::Int16);
            }
            ArrayValue::Int32(v) => {
                self.write_number_array(v.iter().map(|&n| n as i64), NumberType::Int32);
            }
            ArrayValue::Int64(v) => {
                self.write_number_array(v.iter().copied(), NumberType::Int64);
            }
            ArrayValue::Float32(v) => {
                self.write_number_array(v.iter().map(|&n| number::f32_bits(n)), NumberType::Float32);
            }
            ArrayValue::Float64(v) => {
                self.write_number_array(v.iter().map(|&n| number::f64_bits(n)), NumberType::Float64);
            }
            ArrayValue::Text(v) => {
                self.long1 = FALSE;
                for (i, element) in v.iter().enumerate() {
                    self.set_text_element(i, element.as_bytes())?;
                }
            }
            ArrayValue::Char(v) => {
                self.long1 = TRUE;
                for (i, element) in v.iter().enumerate() {
                    self.set_text_element(i, element.encode_utf8(&mut [0; 4]).as_bytes())?;
                }
            }
            ArrayValue::Date(v) => self.write_elements(v.iter().map(|&d| [d, 0, 0, 0])),
            ArrayValue::LocalTime(v) => self.write_elements(v.iter().map(|&t| [t, 0, 0, 0])),
            ArrayValue::Time(v) => self.write_elements(v.iter().map(time_fields)),
            ArrayValue::LocalDateTime(v) => {
                self.write_elements(v.iter().map(local_date_time_fields));
            }
            ArrayValue::DateTime(v) => self.write_elements(v.iter().map(date_time_fields)),
            ArrayValue::Duration(v) => self.write_elements(v.iter().map(duration_fields)),
            ArrayValue::Point(v) => self.write_point_array(v)?,
        }
        Ok(())
    }

    fn begin_array(&mut self, length: usize) {
        self.array_length = length;
        for array in [
            &mut self.long0_array,
            &mut self.long1_array,
            &mut self.long2_array,
            &mut self.long3_array,
        ] {
            if array.len() < length {
                array.resize(length, 0);
            }
        }
        if self.bytes_array.len() < length {
            self.bytes_array.resize_with(length, Vec::new);
        }
    }

    fn write_elements(&mut self, elements: impl Iterator<Item = [i64; 4]>) {
        for (i, fields) in elements.enumerate() {
            self.set_element_fields(i, fields);
        }
    }

    fn write_number_array(&mut self, bits: impl Iterator<Item = i64>, number_type: NumberType) {
        self.long1 = number_type.id();
        for (i, value) in bits.enumerate() {
            self.long0_array[i] = value;
        }
    }

    fn set_text_element(&mut self, index: usize, bytes: &[u8]) -> Result<()> {
        check_text_length(bytes)?;
        let element = &mut self.bytes_array[index];
        grow_with_headroom(element, bytes.len());
        element[..bytes.len()].copy_from_slice(bytes);
        self.long0_array[index] = bytes.len() as i64;
        Ok(())
    }

    fn write_point_array(&mut self, points: &[Point]) -> Result<()> {
        let Some(first) = points.first() else {
            return Ok(());
        };
        let crs = first.crs;
        let dims = crs.dimensions();
        self.set_crs(crs);
        if self.long1_array.len() < points.len() * dims {
            self.long1_array.resize(points.len() * dims, 0);
        }
        let curve = self.curves.curve(crs);
        for (i, point) in points.iter().enumerate() {
            check_point(point, crs)?;
            self.long0_array[i] = curve.derived_value_for(&point.coordinates);
            for (d, coordinate) in point.coordinates.iter().enumerate() {
                self.long1_array[i * dims + d] = number::f64_bits(*coordinate);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Field access
    // =========================================================================

    fn scalar_fields(&self) -> [i64; 4] {
        [self.long0, self.long1, self.long2, self.long3]
    }

    fn element_fields(&self, index: usize) -> [i64; 4] {
        [
            self.long0_array[index],
            self.long1_array[index],
            self.long2_array[index],
            self.long3_array[index],
        ]
    }

    fn set_element_fields(&mut self, index: usize, fields: [i64; 4]) {
        self.long0_array[index] = fields[0];
        self.long1_array[index] = fields[1];
        self.long2_array[index] = fields[2];
        self.long3_array[index] = fields[3];
    }

    fn text_bytes(&self) -> &[u8] {
        let length = (self.long0.max(0) as usize).min(self.bytes.len());
        &self.bytes[..length]
    }

    fn element_text(&self, index: usize) -> &[u8] {
        let element = &self.bytes_array[index];
        let length = (self.long0_array[index].max(0) as usize).min(element.len());
        &element[..length]
    }

    fn number_type(&self) -> NumberType {
        NumberType::from_id(self.long1).unwrap_or(NumberType::Int64)
    }

    fn dimensions(&self) -> usize {
        self.long3.clamp(0, 3) as usize
    }

    fn coordinate(&self, index: usize) -> i64 {
        self.long1_array.get(index).copied().unwrap_or_default()
    }

    fn geometry_view(&self) -> GeometryView<'_> {
        let dims = self.dimensions().min(self.long1_array.len());
        GeometryView {
            table_id: self.long1,
            code: self.long2,
            derived_value: self.long0,
            coordinates: (!self.no_coordinates).then(|| &self.long1_array[..dims]),
        }
    }

    fn geometry_element(&self, index: usize) -> GeometryView<'_> {
        let dims = self.dimensions();
        let start = (index * dims).min(self.long1_array.len());
        let end = (start + dims).min(self.long1_array.len());
        GeometryView {
            table_id: self.long1,
            code: self.long2,
            derived_value: self.long0_array[index],
            coordinates: Some(&self.long1_array[start..end]),
        }
    }

    /// The value held, or `None` for sentinels, seek boundaries and fields
    /// that do not map back to a value.
    pub fn as_value(&self) -> Option<Value> {
        if self.inclusion != Inclusion::Neutral {
            return None;
        }
        let key_type = self.key_type?;
        if key_type.is_array() {
            return self.array_as_value(key_type);
        }
        match key_type {
            KeyType::Text if self.long3 != FALSE => None,
            KeyType::Text => Some(text_value(self.text_bytes(), self.long1 != FALSE)),
            KeyType::Number => Some(number_value(self.long0, self.number_type())),
            KeyType::Geometry if self.no_coordinates => None,
            KeyType::Geometry => {
                let crs = self.crs()?;
                let coordinates = (0..crs.dimensions())
                    .map(|d| f64::from_bits(self.coordinate(d) as u64))
                    .collect();
                Some(Value::Point(Point::new(crs, coordinates)))
            }
            simple => simple_value(simple, &self.scalar_fields()),
        }
    }

    fn crs(&self) -> Option<CoordinateReferenceSystem> {
        CoordinateReferenceSystem::from_table_and_code(
            u32::try_from(self.long1).ok()?,
            u32::try_from(self.long2).ok()?,
        )
    }

    fn array_as_value(&self, key_type: KeyType) -> Option<Value> {
        if self.is_highest_array {
            return None;
        }
        let n = self.array_length;
        let fields = |i| self.element_fields(i);
        let array = match key_type.element_type() {
            KeyType::Boolean => ArrayValue::Bool((0..n).map(|i| self.long0_array[i] != FALSE).collect()),
            KeyType::Number => {
                let bits = &self.long0_array[..n];
                match self.number_type() {
                    NumberType::Int8 => ArrayValue::Int8(bits.iter().map(|&b| b as i8).collect()),
                    NumberType::Int16 => ArrayValue::Int16(bits.iter().map(|&b| b as i16).collect()),
                    NumberType::Int32 => ArrayValue::Int32(bits.iter().map(|&b| b as i32).collect()),
                    NumberType::Int64 => ArrayValue::Int64(bits.to_vec()),
                    NumberType::Float32 => ArrayValue::Float32(
                        bits.iter().map(|&b| f32::from_bits(b as u32)).collect(),
                    ),
                    NumberType::Float64 => ArrayValue::Float64(
                        bits.iter().map(|&b| f64::from_bits(b as u64)).collect(),
                    ),
                }
            }
            KeyType::Text if self.long1 != FALSE => ArrayValue::Char(
                (0..n)
                    .map(|i| String::from_utf8_lossy(self.element_text(i)).chars().next().unwrap_or_default())
                    .collect(),
            ),
            KeyType::Text => ArrayValue::Text(
                (0..n)
                    .map(|i| String::from_utf8_lossy(self.element_text(i)).into_owned())
                    .collect(),
            ),
            KeyType::Date => ArrayValue::Date(self.long0_array[..n].to_vec()),
            KeyType::LocalTime => ArrayValue::LocalTime(self.long0_array[..n].to_vec()),
            KeyType::ZonedTime => ArrayValue::Time((0..n).map(|i| time_of(&fields(i))).collect()),
            KeyType::LocalDateTime => {
                ArrayValue::LocalDateTime((0..n).map(|i| local_date_time_of(&fields(i))).collect())
            }
            KeyType::ZonedDateTime => ArrayValue::DateTime(
                (0..n)
                    .map(|i| date_time_of(&fields(i)))
                    .collect::<Option<Vec<_>>>()?,
            ),
            KeyType::Duration => ArrayValue::Duration((0..n).map(|i| duration_of(&fields(i))).collect()),
            KeyType::Geometry => {
                if n == 0 {
                    ArrayValue::Point(Vec::new())
                } else {
                    let crs = self.crs()?;
                    let dims = crs.dimensions();
                    ArrayValue::Point(
                        (0..n)
                            .map(|i| {
                                let coordinates = (0..dims)
                                    .map(|d| f64::from_bits(self.coordinate(i * dims + d) as u64))
                                    .collect();
                                Point::new(crs, coordinates)
                            })
                            .collect(),
                    )
                }
            }
            _ => return None,
        };
        Some(Value::Array(array))
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    /// Encoded size including the type id.
    pub fn size(&self) -> usize {
        match self.key_type {
            Some(key_type) => TYPE_ID_SIZE + self.value_size(key_type),
            None => 0,
        }
    }

    fn value_size(&self, key_type: KeyType) -> usize {
        let n = self.array_length;
        match key_type {
            KeyType::Text => TEXT_HEADER_SIZE + self.text_bytes().len(),
            KeyType::Number => NUMBER_TYPE_SIZE + 8,
            KeyType::Geometry => geometry::HEADER_SIZE + 8 + 8 * self.dimensions(),
            KeyType::TextArray => {
                ARRAY_LENGTH_SIZE
                    + (0..n)
                        .map(|i| TEXT_HEADER_SIZE + self.element_text(i).len())
                        .sum::<usize>()
            }
            KeyType::NumberArray => NUMBER_TYPE_SIZE + ARRAY_LENGTH_SIZE + 8 * n,
            KeyType::GeometryArray => {
                geometry::HEADER_SIZE + ARRAY_LENGTH_SIZE + n * (8 + 8 * self.dimensions())
            }
            array if array.is_array() => {
                ARRAY_LENGTH_SIZE + n * simple_size(array.element_type())
            }
            simple => simple_size(simple),
        }
    }

    /// Write the slot: type id, then the category's fields.
    pub fn put(&self, cursor: &mut PageCursor) {
        let Some(key_type) = self.key_type else {
            return;
        };
        cursor.put_u8(key_type.type_id());
        let n = self.array_length;
        match key_type {
            KeyType::Text => put_text(cursor, self.text_bytes(), self.long1 != FALSE),
            KeyType::Number => {
                cursor.put_i8(self.long1 as i8);
                cursor.put_i64(self.long0);
            }
            KeyType::Geometry => {
                let dims = self.dimensions();
                geometry::put_header(cursor, geometry::pack_header(self.long1, self.long2, dims));
                cursor.put_i64(self.long0);
                for d in 0..dims {
                    cursor.put_i64(self.coordinate(d));
                }
            }
            KeyType::TextArray => {
                cursor.put_i16(n as i16);
                for i in 0..n {
                    put_text(cursor, self.element_text(i), self.long1 != FALSE);
                }
            }
            KeyType::NumberArray => {
                cursor.put_i8(self.long1 as i8);
                cursor.put_i16(n as i16);
                for &bits in &self.long0_array[..n] {
                    cursor.put_i64(bits);
                }
            }
            KeyType::GeometryArray => {
                let dims = self.dimensions();
                geometry::put_header(cursor, geometry::pack_header(self.long1, self.long2, dims));
                cursor.put_i16(n as i16);
                for i in 0..n {
                    cursor.put_i64(self.long0_array[i]);
                    for d in 0..dims {
                        cursor.put_i64(self.coordinate(i * dims + d));
                    }
                }
            }
            array if array.is_array() => {
                cursor.put_i16(n as i16);
                for i in 0..n {
                    put_simple(cursor, array.element_type(), &self.element_fields(i));
                }
            }
            simple => put_simple(cursor, simple, &self.scalar_fields()),
        }
    }

    /// Read a slot of at most `size` bytes. On bad input records a cursor
    /// exception and returns false; the state is then garbage but safe.
    pub fn read(&mut self, cursor: &mut PageCursor, size: usize) -> bool {
        self.clear();
        if size < TYPE_ID_SIZE {
            return fault(cursor, format!("slot size {size} leaves no room for a type id"));
        }
        let type_id = cursor.get_u8();
        let Some(key_type) = KeyType::from_type_id(type_id) else {
            return fault(cursor, format!("unknown key type id {type_id}"));
        };
        self.key_type = Some(key_type);
        self.read_value(key_type, cursor, size - TYPE_ID_SIZE) && !cursor.has_cursor_exception()
    }

    fn read_value(&mut self, key_type: KeyType, cursor: &mut PageCursor, size: usize) -> bool {
        match key_type {
            KeyType::Text => {
                let Some((length, is_char)) = read_text_header(cursor, size) else {
                    return false;
                };
                grow_with_headroom(&mut self.bytes, length);
                cursor.get_bytes(&mut self.bytes[..length]);
                self.long0 = length as i64;
                self.long1 = if is_char { TRUE } else { FALSE };
                true
            }
            KeyType::Number => {
                if size < NUMBER_TYPE_SIZE + 8 {
                    return fault(cursor, format!("number slot of {size} bytes"));
                }
                let Some(number_type) = read_number_type(cursor) else {
                    return false;
                };
                self.long1 = number_type.id();
                self.long0 = cursor.get_i64();
                true
            }
            KeyType::Geometry => {
                if size < geometry::HEADER_SIZE + 8 {
                    return fault(cursor, format!("geometry slot of {size} bytes"));
                }
                let (table_id, code, dims) = geometry::unpack_header(geometry::get_header(cursor));
                if size < geometry::HEADER_SIZE + 8 + 8 * dims {
                    return fault(cursor, format!("geometry slot of {size} bytes for {dims} dimensions"));
                }
                self.long1 = table_id;
                self.long2 = code;
                self.long3 = dims as i64;
                self.long0 = cursor.get_i64();
                if self.long1_array.len() < dims {
                    self.long1_array.resize(dims, 0);
                }
                for d in 0..dims {
                    self.long1_array[d] = cursor.get_i64();
                }
                true
            }
            KeyType::TextArray => {
                let Some(n) = read_array_length(cursor, size) else {
                    return false;
                };
                self.begin_array(n);
                let mut remaining = size - ARRAY_LENGTH_SIZE;
                for i in 0..n {
                    let Some((length, is_char)) = read_text_header(cursor, remaining) else {
                        return false;
                    };
                    remaining -= TEXT_HEADER_SIZE + length;
                    let element = &mut self.bytes_array[i];
                    grow_with_headroom(element, length);
                    cursor.get_bytes(&mut element[..length]);
                    self.long0_array[i] = length as i64;
                    if is_char {
                        self.long1 = TRUE;
                    }
                }
                true
            }
            KeyType::NumberArray => {
                if size < NUMBER_TYPE_SIZE + ARRAY_LENGTH_SIZE {
                    return fault(cursor, format!("number array slot of {size} bytes"));
                }
                let Some(number_type) = read_number_type(cursor) else {
                    return false;
                };
                let Some(n) = read_array_length(cursor, size - NUMBER_TYPE_SIZE) else {
                    return false;
                };
                if NUMBER_TYPE_SIZE + ARRAY_LENGTH_SIZE + 8 * n > size {
                    return fault(cursor, format!("{n} numbers do not fit in {size} bytes"));
                }
                self.begin_array(n);
                self.long1 = number_type.id();
                for i in 0..n {
                    self.long0_array[i] = cursor.get_i64();
                }
                true
            }
            KeyType::GeometryArray => {
                if size < geometry::HEADER_SIZE + ARRAY_LENGTH_SIZE {
                    return fault(cursor, format!("geometry array slot of {size} bytes"));
                }
                let (table_id, code, dims) = geometry::unpack_header(geometry::get_header(cursor));
                let Some(n) = read_array_length(cursor, size - geometry::HEADER_SIZE) else {
                    return false;
                };
                if geometry::HEADER_SIZE + ARRAY_LENGTH_SIZE + n * (8 + 8 * dims) > size {
                    return fault(cursor, format!("{n} points do not fit in {size} bytes"));
                }
                self.begin_array(n);
                self.long1 = table_id;
                self.long2 = code;
                self.long3 = dims as i64;
                if self.long1_array.len() < n * dims {
                    self.long1_array.resize(n * dims, 0);
                }
                for i in 0..n {
                    self.long0_array[i] = cursor.get_i64();
                    for d in 0..dims {
                        self.long1_array[i * dims + d] = cursor.get_i64();
                    }
                }
                true
            }
            array if array.is_array() => {
                let Some(n) = read_array_length(cursor, size) else {
                    return false;
                };
                let element_type = array.element_type();
                if ARRAY_LENGTH_SIZE + n * simple_size(element_type) > size {
                    return fault(cursor, format!("{n} elements do not fit in {size} bytes"));
                }
                self.begin_array(n);
                for i in 0..n {
                    let fields = get_simple(cursor, element_type);
                    self.set_element_fields(i, fields);
                }
                true
            }
            simple => {
                if size < simple_size(simple) {
                    return fault(cursor, format!("{simple:?} slot of {size} bytes"));
                }
                [self.long0, self.long1, self.long2, self.long3] = get_simple(cursor, simple);
                true
            }
        }
    }

    // =========================================================================
    // Comparison
    // =========================================================================

    /// Category order, then value, then inclusion.
    pub fn compare_value_to(&self, other: &KeyState) -> Ordering {
        let (left, right) = match (self.key_type, other.key_type) {
            (Some(left), Some(right)) => (left, right),
            (None, None) => return self.inclusion.cmp(&other.inclusion),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
        };
        left.compare_order(right)
            .then_with(|| self.compare_same_type(other, left))
            .then(self.inclusion.cmp(&other.inclusion))
    }

    fn compare_same_type(&self, other: &KeyState, key_type: KeyType) -> Ordering {
        match key_type {
            KeyType::Text => text::compare_text(
                self.text_bytes(),
                self.long3 != FALSE,
                other.text_bytes(),
                other.long3 != FALSE,
                self.long2 != FALSE || other.long2 != FALSE,
            ),
            KeyType::Number => number::compare_raw_bits(
                self.long0,
                self.number_type(),
                other.long0,
                other.number_type(),
            ),
            KeyType::Geometry => {
                geometry::compare_geometry(&self.geometry_view(), &other.geometry_view())
            }
            array if array.is_array() => self.compare_arrays(other, array.element_type()),
            simple => compare_simple(simple, &self.scalar_fields(), &other.scalar_fields()),
        }
    }

    fn compare_arrays(&self, other: &KeyState, element_type: KeyType) -> Ordering {
        if self.is_highest_array || other.is_highest_array {
            return self.is_highest_array.cmp(&other.is_highest_array);
        }
        let common = self.array_length.min(other.array_length);
        (0..common)
            .map(|i| self.compare_element(other, element_type, i))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| self.array_length.cmp(&other.array_length))
    }

    fn compare_element(&self, other: &KeyState, element_type: KeyType, index: usize) -> Ordering {
        match element_type {
            KeyType::Text => text::lexicographical_compare(
                self.element_text(index),
                other.element_text(index),
                false,
            ),
            KeyType::Number => number::compare_raw_bits(
                self.long0_array[index],
                self.number_type(),
                other.long0_array[index],
                other.number_type(),
            ),
            KeyType::Geometry => geometry::compare_geometry(
                &self.geometry_element(index),
                &other.geometry_element(index),
            ),
            simple => compare_simple(
                simple,
                &self.element_fields(index),
                &other.element_fields(index),
            ),
        }
    }

    /// Shortest key `into` with `left < into <= right`, given `left < right`.
    /// Text and arrays are cut to the first byte or element that differs,
    /// everything else is a copy of `right`.
    pub fn minimal_splitter(left: &KeyState, right: &KeyState, into: &mut KeyState) {
        into.copy_from(right);
        let Some(key_type) = right.key_type else {
            return;
        };
        if left.key_type != right.key_type {
            return;
        }
        if key_type == KeyType::Text {
            let plain = |s: &KeyState| s.long2 == FALSE && s.long3 == FALSE;
            if plain(left) && plain(right) {
                let length = text::minimal_length_to_differ(left.text_bytes(), right.text_bytes());
                if length < right.text_bytes().len() {
                    into.long0 = length as i64;
                    into.long1 = FALSE;
                }
            }
        } else if key_type.is_array() && !left.is_highest_array && !right.is_highest_array {
            let element_type = key_type.element_type();
            let common = left.array_length.min(right.array_length);
            let equal = (0..common)
                .take_while(|&i| left.compare_element(right, element_type, i) == Ordering::Equal)
                .count();
            into.array_length = right.array_length.min(equal + 1);
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_value() {
            Some(value) => write!(f, "{value:?}"),
            None => write!(f, "{:?}({:?})", self.key_type, self.inclusion),
        }
    }
}

// =============================================================================
// Per-category helpers
// =============================================================================

fn fault(cursor: &mut PageCursor, message: String) -> bool {
    cursor.set_cursor_exception(message);
    false
}

fn check_text_length(bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_TEXT_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "text of {} bytes exceeds the maximum of {MAX_TEXT_LENGTH}",
            bytes.len()
        )));
    }
    Ok(())
}

fn check_point(point: &Point, crs: CoordinateReferenceSystem) -> Result<usize> {
    if point.crs != crs {
        return Err(Error::InvalidArgument(format!(
            "point in {} mixed into a {} array",
            point.crs.name(),
            crs.name()
        )));
    }
    if point.coordinates.len() != crs.dimensions() {
        return Err(Error::InvalidArgument(format!(
            "{} point needs {} coordinates, got {}",
            crs.name(),
            crs.dimensions(),
            point.coordinates.len()
        )));
    }
    Ok(crs.dimensions())
}

/// Grow `buffer` to hold `length` bytes, with half again as headroom.
fn grow_with_headroom(buffer: &mut Vec<u8>, length: usize) {
    if buffer.len() < length {
        buffer.resize(length + length / 2, 0);
    }
}

fn put_text(cursor: &mut PageCursor, bytes: &[u8], is_char: bool) {
    let marker = if is_char { CHAR_MARKER } else { 0 };
    cursor.put_u16(bytes.len() as u16 | marker);
    cursor.put_bytes(bytes);
}

fn read_text_header(cursor: &mut PageCursor, size: usize) -> Option<(usize, bool)> {
    if size < TEXT_HEADER_SIZE {
        fault(cursor, format!("text slot of {size} bytes"));
        return None;
    }
    let raw = cursor.get_u16();
    let length = (raw & !CHAR_MARKER) as usize;
    if length > size - TEXT_HEADER_SIZE {
        fault(cursor, format!("text length {length} exceeds remaining {size} bytes"));
        return None;
    }
    Some((length, raw & CHAR_MARKER != 0))
}

fn read_number_type(cursor: &mut PageCursor) -> Option<NumberType> {
    let id = cursor.get_i8();
    let number_type = NumberType::from_id(id as i64);
    if number_type.is_none() {
        fault(cursor, format!("unknown number type {id}"));
    }
    number_type
}

fn read_array_length(cursor: &mut PageCursor, size: usize) -> Option<usize> {
    if size < ARRAY_LENGTH_SIZE {
        fault(cursor, format!("array slot of {size} bytes"));
        return None;
    }
    let length = cursor.get_i16();
    if length < 0 || length as usize > MAX_ARRAY_LENGTH {
        fault(cursor, format!("array length {length} out of range"));
        return None;
    }
    Some(length as usize)
}

/// Encoded size of the fixed-size categories.
fn simple_size(key_type: KeyType) -> usize {
    match key_type {
        KeyType::ZonedDateTime => 16,
        KeyType::LocalDateTime => 12,
        KeyType::Date => 8,
        KeyType::ZonedTime => 12,
        KeyType::LocalTime => 8,
        KeyType::Duration => 28,
        KeyType::Boolean => 1,
        _ => 0,
    }
}

fn put_simple(cursor: &mut PageCursor, key_type: KeyType, f: &[i64; 4]) {
    match key_type {
        KeyType::ZonedDateTime => {
            cursor.put_i64(f[0]);
            cursor.put_i32(f[1] as i32);
            cursor.put_i32(temporal::encode_zone(f[2], f[3]));
        }
        KeyType::LocalDateTime | KeyType::ZonedTime => {
            cursor.put_i64(f[0]);
            cursor.put_i32(f[1] as i32);
        }
        KeyType::Date | KeyType::LocalTime => cursor.put_i64(f[0]),
        KeyType::Duration => {
            cursor.put_i64(f[0]);
            cursor.put_i32(f[1] as i32);
            cursor.put_i64(f[2]);
            cursor.put_i64(f[3]);
        }
        KeyType::Boolean => cursor.put_u8(f[0] as u8),
        _ => {}
    }
}

fn get_simple(cursor: &mut PageCursor, key_type: KeyType) -> [i64; 4] {
    match key_type {
        KeyType::ZonedDateTime => {
            let epoch_second = cursor.get_i64();
            let nano = cursor.get_i32() as i64;
            let (zone_id, offset) = temporal::decode_zone(cursor.get_i32());
            [epoch_second, nano, zone_id, offset]
        }
        KeyType::LocalDateTime | KeyType::ZonedTime => {
            [cursor.get_i64(), cursor.get_i32() as i64, 0, 0]
        }
        KeyType::Date | KeyType::LocalTime => [cursor.get_i64(), 0, 0, 0],
        KeyType::Duration => [
            cursor.get_i64(),
            cursor.get_i32() as i64,
            cursor.get_i64(),
            cursor.get_i64(),
        ],
        KeyType::Boolean => [(cursor.get_u8() != 0) as i64, 0, 0, 0],
        _ => [0; 4],
    }
}

fn compare_simple(key_type: KeyType, left: &[i64; 4], right: &[i64; 4]) -> Ordering {
    match key_type {
        KeyType::ZonedDateTime => {
            temporal::compare_zoned_date_time(&zoned_fields(left), &zoned_fields(right))
        }
        _ => left.cmp(right),
    }
}

fn zoned_fields(f: &[i64; 4]) -> ZonedDateTimeFields {
    ZonedDateTimeFields {
        epoch_second: f[0],
        nano: f[1],
        zone_id: f[2],
        offset_seconds: f[3],
    }
}

fn time_fields(time: &Time) -> [i64; 4] {
    [time.nanos_of_day_utc, time.offset_seconds as i64, 0, 0]
}

fn local_date_time_fields(date_time: &LocalDateTime) -> [i64; 4] {
    [date_time.epoch_second, date_time.nano as i64, 0, 0]
}

fn date_time_fields(date_time: &DateTime) -> [i64; 4] {
    match date_time.zone {
        Zone::Offset(offset) => [
            date_time.epoch_second,
            date_time.nano as i64,
            temporal::NO_ZONE_ID,
            offset as i64,
        ],
        Zone::Named(zone) => [
            date_time.epoch_second,
            date_time.nano as i64,
            temporal::zone_id_of(zone),
            0,
        ],
    }
}

fn duration_fields(duration: &Duration) -> [i64; 4] {
    [
        temporal::total_avg_seconds(duration.months, duration.days, duration.seconds),
        duration.nanos as i64,
        duration.months,
        duration.days,
    ]
}

fn time_of(f: &[i64; 4]) -> Time {
    Time {
        nanos_of_day_utc: f[0],
        offset_seconds: f[1] as i32,
    }
}

fn local_date_time_of(f: &[i64; 4]) -> LocalDateTime {
    LocalDateTime {
        epoch_second: f[0],
        nano: f[1] as i32,
    }
}

fn date_time_of(f: &[i64; 4]) -> Option<DateTime> {
    let zone = if f[2] >= 0 {
        Zone::Named(temporal::zone_of_id(f[2])?)
    } else {
        Zone::Offset(f[3] as i32)
    };
    Some(DateTime {
        epoch_second: f[0],
        nano: f[1] as i32,
        zone,
    })
}

fn duration_of(f: &[i64; 4]) -> Duration {
    Duration {
        months: f[2],
        days: f[3],
        seconds: temporal::seconds_of(f[0], f[2], f[3]),
        nanos: f[1] as i32,
    }
}

fn simple_value(key_type: KeyType, f: &[i64; 4]) -> Option<Value> {
    Some(match key_type {
        KeyType::ZonedDateTime => Value::DateTime(date_time_of(f)?),
        KeyType::LocalDateTime => Value::LocalDateTime(local_date_time_of(f)),
        KeyType::Date => Value::Date(f[0]),
        KeyType::ZonedTime => Value::Time(time_of(f)),
        KeyType::LocalTime => Value::LocalTime(f[0]),
        KeyType::Duration => Value::Duration(duration_of(f)),
        KeyType::Boolean => Value::Bool(f[0] != FALSE),
        _ => return None,
    })
}

fn number_value(bits: i64, number_type: NumberType) -> Value {
    match number_type {
        NumberType::Int8 => Value::Int8(bits as i8),
        NumberType::Int16 => Value::Int16(bits as i16),
        NumberType::Int32 => Value::Int32(bits as i32),
        NumberType::Int64 => Value::Int64(bits),
        NumberType::Float32 => Value::Float32(f32::from_bits(bits as u32)),
        NumberType::Float64 => Value::Float64(f64::from_bits(bits as u64)),
    }
}

fn text_value(bytes: &[u8], is_char: bool) -> Value {
    let text = String::from_utf8_lossy(bytes).into_owned();
    if is_char {
        let mut chars = text.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Value::Char(c);
        }
    }
    Value::Text(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(value: Value) -> KeyState {
        let mut state = KeyState::default();
        state.write_value(&value, Inclusion::Neutral).unwrap();
        state
    }

    fn roundtrip(value: Value) -> KeyState {
        let written = state(value);
        let mut cursor = PageCursor::with_capacity(64);
        written.put(&mut cursor);
        assert_eq!(cursor.offset(), written.size());
        let mut cursor = PageCursor::from_bytes(cursor.written().to_vec());
        let mut read = KeyState::default();
        assert!(read.read(&mut cursor, written.size()));
        read
    }

    #[test]
    fn text_buffer_grows_with_headroom() {
        let mut s = state(Value::Text("abcd".into()));
        assert_eq!(s.bytes.len(), 6);
        s.write_value(&Value::Text("ab".into()), Inclusion::Neutral).unwrap();
        assert_eq!(s.bytes.len(), 6);
        assert_eq!(s.text_bytes(), b"ab");
    }

    #[test]
    fn char_marker_survives_encoding() {
        let read = roundtrip(Value::Char('ö'));
        assert_eq!(read.as_value(), Some(Value::Char('ö')));
    }

    #[test]
    fn duration_stores_average_total() {
        let read = roundtrip(Value::Duration(Duration {
            months: 1,
            days: 1,
            seconds: 1,
            nanos: 5,
        }));
        assert_eq!(read.long0, temporal::AVG_MONTH_SECONDS + temporal::AVG_DAY_SECONDS + 1);
        assert_eq!(read.long1, 5);
    }

    #[test]
    fn copy_is_independent() {
        let original = state(Value::Array(ArrayValue::Text(vec!["a".into(), "b".into()])));
        let mut copy = KeyState::default();
        copy.copy_from(&original);
        assert_eq!(copy.compare_value_to(&original), Ordering::Equal);
        copy.write_value(&Value::Int64(1), Inclusion::Neutral).unwrap();
        assert_eq!(
            original.as_value(),
            Some(Value::Array(ArrayValue::Text(vec!["a".into(), "b".into()])))
        );
    }

    #[test]
    fn unknown_type_id_faults() {
        let mut cursor = PageCursor::from_bytes(vec![99, 0, 0]);
        let mut s = KeyState::default();
        assert!(!s.read(&mut cursor, 3));
        assert!(cursor.has_cursor_exception());
    }

    #[test]
    fn number_array_subtype_written_once() {
        let s = state(Value::Array(ArrayValue::Int32(vec![1, 2, 3])));
        assert_eq!(s.size(), TYPE_ID_SIZE + NUMBER_TYPE_SIZE + ARRAY_LENGTH_SIZE + 3 * 8);
    }
}
