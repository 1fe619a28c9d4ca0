//! Numbers are stored as raw bits plus the subtype they were written with.
//! Comparison interprets the bits per subtype and compares mixed integral and
//! floating values exactly, without widening to a common type first.

use std::cmp::Ordering;

/// Numeric subtype, stored in front of the raw bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberType {
    Int8 = 0,
    Int16 = 1,
    Int32 = 2,
    Int64 = 3,
    Float32 = 4,
    Float64 = 5,
}

impl NumberType {
    pub fn from_id(id: i64) -> Option<NumberType> {
        match id {
            0 => Some(NumberType::Int8),
            1 => Some(NumberType::Int16),
            2 => Some(NumberType::Int32),
            3 => Some(NumberType::Int64),
            4 => Some(NumberType::Float32),
            5 => Some(NumberType::Float64),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        self as i64
    }

    pub fn is_floating(self) -> bool {
        matches!(self, NumberType::Float32 | NumberType::Float64)
    }
}

/// Raw bits of an `f32` as stored in a key.
pub fn f32_bits(value: f32) -> i64 {
    value.to_bits() as i32 as i64
}

pub fn f64_bits(value: f64) -> i64 {
    value.to_bits() as i64
}

/// Floating value of raw bits, exact for both float widths.
pub fn to_f64(bits: i64, number_type: NumberType) -> f64 {
    match number_type {
        NumberType::Float32 => f32::from_bits(bits as u32) as f64,
        NumberType::Float64 => f64::from_bits(bits as u64),
        _ => bits as f64,
    }
}

/// Compare two stored numbers. NaN sorts above every other number and equal
/// to any NaN; `-0.0` equals `0.0` and the integer zero.
pub fn compare_raw_bits(
    lhs: i64,
    lhs_type: NumberType,
    rhs: i64,
    rhs_type: NumberType,
) -> Ordering {
    match (lhs_type.is_floating(), rhs_type.is_floating()) {
        (false, false) => lhs.cmp(&rhs),
        (true, true) => compare_doubles(to_f64(lhs, lhs_type), to_f64(rhs, rhs_type)),
        (true, false) => compare_double_with_long(to_f64(lhs, lhs_type), rhs),
        (false, true) => compare_double_with_long(to_f64(rhs, rhs_type), lhs).reverse(),
    }
}

fn compare_doubles(lhs: f64, rhs: f64) -> Ordering {
    match lhs.partial_cmp(&rhs) {
        Some(ordering) => ordering,
        None => lhs.is_nan().cmp(&rhs.is_nan()),
    }
}

/// Exact comparison of a double against a long, no precision loss.
fn compare_double_with_long(lhs: f64, rhs: i64) -> Ordering {
    // 2^63, the first double above every i64
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

    if lhs.is_nan() || lhs >= TWO_POW_63 {
        return Ordering::Greater;
    }
    if lhs < -TWO_POW_63 {
        return Ordering::Less;
    }
    let truncated = lhs.trunc();
    match (truncated as i64).cmp(&rhs) {
        Ordering::Equal => compare_doubles(lhs, truncated),
        ordering => ordering,
    }
}
