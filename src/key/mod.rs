//! Polymorphic index keys.
//!
//! One key slot can hold a value of any supported category. Each slot is
//! encoded as a one-byte type id followed by the category's fields:
//!
//! ```text
//! ┌─────────┬──────────────────────────────┐
//! │ type(1B)│ category fields (big-endian) │
//! └─────────┴──────────────────────────────┘
//! ```
//!
//! A tree key is the entity id followed by one slot per indexed property.
//! Slots compare first by category ([`KeyType::compare_order`]), then by
//! value, then by [`Inclusion`](crate::types::Inclusion).

pub mod geometry;
pub mod layout;
pub mod number;
pub mod state;
pub mod temporal;
pub mod text;
pub mod value;

use std::cmp::Ordering;

pub use layout::{GenericLayout, IndexKey, Layout, NullValue};
pub use number::NumberType;
pub use state::KeyState;
pub use value::{ArrayValue, DateTime, Duration, LocalDateTime, Point, Time, Value, Zone};

/// Bytes taken by the type id in front of every slot.
pub const TYPE_ID_SIZE: usize = 1;

/// Bytes taken by the entity id in front of a tree key.
pub const ENTITY_ID_SIZE: usize = 8;

/// Longest text (in UTF-8 bytes) a slot can hold. The top bit of the
/// on-disk length marks a single character.
pub const MAX_TEXT_LENGTH: usize = 0x7FFF;

/// Upper bound on array elements accepted when writing or reading a slot.
pub const MAX_ARRAY_LENGTH: usize = 4096;

/// Value categories, one per scalar kind plus one array kind each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    ZonedDateTime,
    LocalDateTime,
    Date,
    ZonedTime,
    LocalTime,
    Duration,
    Text,
    Boolean,
    Number,
    ZonedDateTimeArray,
    LocalDateTimeArray,
    DateArray,
    ZonedTimeArray,
    LocalTimeArray,
    DurationArray,
    TextArray,
    BooleanArray,
    NumberArray,
    Geometry,
    GeometryArray,
}

/// Indexed by type id.
const BY_TYPE_ID: [KeyType; 20] = [
    KeyType::ZonedDateTime,
    KeyType::LocalDateTime,
    KeyType::Date,
    KeyType::ZonedTime,
    KeyType::LocalTime,
    KeyType::Duration,
    KeyType::Text,
    KeyType::Boolean,
    KeyType::Number,
    KeyType::ZonedDateTimeArray,
    KeyType::LocalDateTimeArray,
    KeyType::DateArray,
    KeyType::ZonedTimeArray,
    KeyType::LocalTimeArray,
    KeyType::DurationArray,
    KeyType::TextArray,
    KeyType::BooleanArray,
    KeyType::NumberArray,
    KeyType::Geometry,
    KeyType::GeometryArray,
];

/// Sort order of categories: every array category sorts before every
/// scalar one, geometry first within each half.
const COMPARISON_ORDER: [KeyType; 20] = [
    KeyType::GeometryArray,
    KeyType::ZonedDateTimeArray,
    KeyType::LocalDateTimeArray,
    KeyType::DateArray,
    KeyType::ZonedTimeArray,
    KeyType::LocalTimeArray,
    KeyType::DurationArray,
    KeyType::TextArray,
    KeyType::BooleanArray,
    KeyType::NumberArray,
    KeyType::Geometry,
    KeyType::ZonedDateTime,
    KeyType::LocalDateTime,
    KeyType::Date,
    KeyType::ZonedTime,
    KeyType::LocalTime,
    KeyType::Duration,
    KeyType::Text,
    KeyType::Boolean,
    KeyType::Number,
];

impl KeyType {
    /// Category of the lowest possible key.
    pub const LOWEST: KeyType = COMPARISON_ORDER[0];
    /// Category of the highest possible key.
    pub const HIGHEST: KeyType = COMPARISON_ORDER[COMPARISON_ORDER.len() - 1];

    /// Declaration order is type id order.
    pub fn type_id(self) -> u8 {
        self as u8
    }

    pub fn from_type_id(id: u8) -> Option<KeyType> {
        BY_TYPE_ID.get(id as usize).copied()
    }

    fn rank(self) -> usize {
        COMPARISON_ORDER
            .iter()
            .position(|&t| t == self)
            .unwrap_or_default()
    }

    pub fn compare_order(self, other: KeyType) -> Ordering {
        self.rank().cmp(&other.rank())
    }

    pub fn is_array(self) -> bool {
        self.element_type() != self
    }

    /// Scalar category of an array's elements. Scalars map to themselves.
    pub fn element_type(self) -> KeyType {
        match self {
            KeyType::ZonedDateTimeArray => KeyType::ZonedDateTime,
            KeyType::LocalDateTimeArray => KeyType::LocalDateTime,
            KeyType::DateArray => KeyType::Date,
            KeyType::ZonedTimeArray => KeyType::ZonedTime,
            KeyType::LocalTimeArray => KeyType::LocalTime,
            KeyType::DurationArray => KeyType::Duration,
            KeyType::TextArray => KeyType::Text,
            KeyType::BooleanArray => KeyType::Boolean,
            KeyType::NumberArray => KeyType::Number,
            KeyType::GeometryArray => KeyType::Geometry,
            scalar => scalar,
        }
    }
}
