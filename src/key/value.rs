//! Values that can be written into a key slot.

use chrono::{DateTime as ChronoDateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use chrono_tz::Tz;

use crate::curve::CoordinateReferenceSystem;
use crate::key::KeyType;
use crate::key::temporal::NANOS_PER_SECOND;

/// Days from 0001-01-01 to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// Zone of a zoned date-time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Offset(i32),
    Named(Tz),
}

/// Date-time with a zone, as an instant plus the zone it is shown in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    pub epoch_second: i64,
    pub nano: i32,
    pub zone: Zone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDateTime {
    pub epoch_second: i64,
    pub nano: i32,
}

/// Time of day with a UTC offset, normalized to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub nanos_of_day_utc: i64,
    pub offset_seconds: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanos: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub crs: CoordinateReferenceSystem,
    pub coordinates: Vec<f64>,
}

impl Point {
    pub fn new(crs: CoordinateReferenceSystem, coordinates: Vec<f64>) -> Self {
        Point { crs, coordinates }
    }

    pub fn cartesian(x: f64, y: f64) -> Self {
        Point::new(CoordinateReferenceSystem::Cartesian, vec![x, y])
    }

    pub fn wgs84(longitude: f64, latitude: f64) -> Self {
        Point::new(CoordinateReferenceSystem::Wgs84, vec![longitude, latitude])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Char(char),
    /// Days since 1970-01-01.
    Date(i64),
    /// Nanoseconds since midnight.
    LocalTime(i64),
    Time(Time),
    LocalDateTime(LocalDateTime),
    DateTime(DateTime),
    Duration(Duration),
    Point(Point),
    Array(ArrayValue),
}

/// Homogeneous arrays, one variant per element kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Text(Vec<String>),
    Char(Vec<char>),
    Date(Vec<i64>),
    LocalTime(Vec<i64>),
    Time(Vec<Time>),
    LocalDateTime(Vec<LocalDateTime>),
    DateTime(Vec<DateTime>),
    Duration(Vec<Duration>),
    Point(Vec<Point>),
}

impl Value {
    /// Key category this value is stored as.
    pub fn key_type(&self) -> KeyType {
        match self {
            Value::Bool(_) => KeyType::Boolean,
            Value::Int8(_)
            | Value::Int16(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::Float32(_)
            | Value::Float64(_) => KeyType::Number,
            Value::Text(_) | Value::Char(_) => KeyType::Text,
            Value::Date(_) => KeyType::Date,
            Value::LocalTime(_) => KeyType::LocalTime,
            Value::Time(_) => KeyType::ZonedTime,
            Value::LocalDateTime(_) => KeyType::LocalDateTime,
            Value::DateTime(_) => KeyType::ZonedDateTime,
            Value::Duration(_) => KeyType::Duration,
            Value::Point(_) => KeyType::Geometry,
            Value::Array(array) => array.key_type(),
        }
    }
}

impl ArrayValue {
    pub fn key_type(&self) -> KeyType {
        match self {
            ArrayValue::Bool(_) => KeyType::BooleanArray,
            ArrayValue::Int8(_)
            | ArrayValue::Int16(_)
            | ArrayValue::Int32(_)
            | ArrayValue::Int64(_)
            | ArrayValue::Float32(_)
            | ArrayValue::Float64(_) => KeyType::NumberArray,
            ArrayValue::Text(_) | ArrayValue::Char(_) => KeyType::TextArray,
            ArrayValue::Date(_) => KeyType::DateArray,
            ArrayValue::LocalTime(_) => KeyType::LocalTimeArray,
            ArrayValue::Time(_) => KeyType::ZonedTimeArray,
            ArrayValue::LocalDateTime(_) => KeyType::LocalDateTimeArray,
            ArrayValue::DateTime(_) => KeyType::ZonedDateTimeArray,
            ArrayValue::Duration(_) => KeyType::DurationArray,
            ArrayValue::Point(_) => KeyType::GeometryArray,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Bool(v) => v.len(),
            ArrayValue::Int8(v) => v.len(),
            ArrayValue::Int16(v) => v.len(),
            ArrayValue::Int32(v) => v.len(),
            ArrayValue::Int64(v) => v.len(),
            ArrayValue::Float32(v) => v.len(),
            ArrayValue::Float64(v) => v.len(),
            ArrayValue::Text(v) => v.len(),
            ArrayValue::Char(v) => v.len(),
            ArrayValue::Date(v) => v.len(),
            ArrayValue::LocalTime(v) => v.len(),
            ArrayValue::Time(v) => v.len(),
            ArrayValue::LocalDateTime(v) => v.len(),
            ArrayValue::DateTime(v) => v.len(),
            ArrayValue::Duration(v) => v.len(),
            ArrayValue::Point(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// --- chrono conversions ---

impl From<NaiveDate> for Value {
    fn from(date: NaiveDate) -> Self {
        Value::Date(date.num_days_from_ce() as i64 - UNIX_EPOCH_DAYS_FROM_CE)
    }
}

impl From<NaiveTime> for Value {
    fn from(time: NaiveTime) -> Self {
        Value::LocalTime(
            time.num_seconds_from_midnight() as i64 * NANOS_PER_SECOND + time.nanosecond() as i64,
        )
    }
}

impl From<NaiveDateTime> for Value {
    fn from(date_time: NaiveDateTime) -> Self {
        let utc = date_time.and_utc();
        Value::LocalDateTime(LocalDateTime {
            epoch_second: utc.timestamp(),
            nano: utc.timestamp_subsec_nanos() as i32,
        })
    }
}

impl From<ChronoDateTime<FixedOffset>> for Value {
    fn from(date_time: ChronoDateTime<FixedOffset>) -> Self {
        Value::DateTime(DateTime {
            epoch_second: date_time.timestamp(),
            nano: date_time.timestamp_subsec_nanos() as i32,
            zone: Zone::Offset(date_time.offset().local_minus_utc()),
        })
    }
}

impl From<ChronoDateTime<Tz>> for Value {
    fn from(date_time: ChronoDateTime<Tz>) -> Self {
        Value::DateTime(DateTime {
            epoch_second: date_time.timestamp(),
            nano: date_time.timestamp_subsec_nanos() as i32,
            zone: Zone::Named(date_time.timezone()),
        })
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Point> for Value {
    fn from(point: Point) -> Self {
        Value::Point(point)
    }
}
