//! Temporal encodings: zone packing, duration normalization and the
//! zoned date-time comparison.
//!
//! A zoned date-time stores its zone in one 32-bit field:
//!
//! ```text
//! named zone:  0000_0001 │ zone id (24 bits)
//! offset:      0000_000s │ offset seconds (24 bits, sign bit 0x0080_0000)
//! ```

use std::cmp::Ordering;

use chrono::{Offset, TimeZone};
use chrono_tz::{TZ_VARIANTS, Tz};

pub const ZONE_ID_FLAG: i32 = 0x0100_0000;
pub const ZONE_ID_MASK: i32 = 0x00FF_FFFF;
const OFFSET_SIGN_BIT: i32 = 0x0080_0000;
const OFFSET_SIGN_EXTENSION: i32 = !ZONE_ID_MASK;

/// Zone id field value of a date-time carrying a plain offset.
pub const NO_ZONE_ID: i64 = -1;

/// Offsets outside +/- 18h are never produced by a real value.
pub const MAX_OFFSET_SECONDS: i64 = 18 * 60 * 60;

pub const AVG_MONTH_SECONDS: i64 = 2_629_800;
pub const AVG_DAY_SECONDS: i64 = 86_400;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

pub fn is_valid_offset(offset_seconds: i64) -> bool {
    (-MAX_OFFSET_SECONDS..=MAX_OFFSET_SECONDS).contains(&offset_seconds)
}

/// Pack a zone id (when non-negative) or an offset into the on-disk field.
pub fn encode_zone(zone_id: i64, offset_seconds: i64) -> i32 {
    if zone_id >= 0 {
        (zone_id as i32 & ZONE_ID_MASK) | ZONE_ID_FLAG
    } else {
        offset_seconds as i32 & ZONE_ID_MASK
    }
}

/// Inverse of [`encode_zone`], returning `(zone_id, offset_seconds)`.
pub fn decode_zone(raw: i32) -> (i64, i64) {
    if raw & ZONE_ID_FLAG != 0 {
        ((raw & ZONE_ID_MASK) as i64, 0)
    } else if raw & OFFSET_SIGN_BIT != 0 {
        (NO_ZONE_ID, (raw | OFFSET_SIGN_EXTENSION) as i64)
    } else {
        (NO_ZONE_ID, (raw & ZONE_ID_MASK) as i64)
    }
}

/// Stable numeric id of a named zone.
pub fn zone_id_of(zone: Tz) -> i64 {
    TZ_VARIANTS
        .iter()
        .position(|&candidate| candidate == zone)
        .map_or(NO_ZONE_ID, |id| id as i64)
}

pub fn zone_of_id(zone_id: i64) -> Option<Tz> {
    usize::try_from(zone_id)
        .ok()
        .and_then(|id| TZ_VARIANTS.get(id))
        .copied()
}

/// UTC offset a named zone has at the given instant.
pub fn offset_at(zone: Tz, epoch_second: i64) -> Option<i32> {
    let instant = chrono::DateTime::from_timestamp(epoch_second, 0)?;
    Some(
        zone.offset_from_utc_datetime(&instant.naive_utc())
            .fix()
            .local_minus_utc(),
    )
}

/// Zoned date-time fields as stored in a key slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZonedDateTimeFields {
    pub epoch_second: i64,
    pub nano: i64,
    pub zone_id: i64,
    pub offset_seconds: i64,
}

/// Instant first. For the same instant both values are materialized when
/// their fields are sane: lower offset first, plain offsets before named
/// zones, then zone name. Garbage fields compare equal here.
pub fn compare_zoned_date_time(left: &ZonedDateTimeFields, right: &ZonedDateTimeFields) -> Ordering {
    let instant = left
        .epoch_second
        .cmp(&right.epoch_second)
        .then(left.nano.cmp(&right.nano));
    if instant != Ordering::Equal {
        return instant;
    }
    if !is_valid_offset(left.offset_seconds) || !is_valid_offset(right.offset_seconds) {
        return Ordering::Equal;
    }
    match (materialize(left), materialize(right)) {
        (Some(l), Some(r)) => l.0.cmp(&r.0).then_with(|| compare_zone_names(l.1, r.1)),
        _ => Ordering::Equal,
    }
}

/// Effective offset and zone (None for a plain offset).
fn materialize(fields: &ZonedDateTimeFields) -> Option<(i32, Option<Tz>)> {
    if fields.zone_id < 0 {
        return Some((fields.offset_seconds as i32, None));
    }
    let zone = zone_of_id(fields.zone_id)?;
    Some((offset_at(zone, fields.epoch_second)?, Some(zone)))
}

fn compare_zone_names(left: Option<Tz>, right: Option<Tz>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(l), Some(r)) => l.name().cmp(r.name()),
    }
}

/// Duration stored as average total seconds so it sorts by rough length.
pub fn total_avg_seconds(months: i64, days: i64, seconds: i64) -> i64 {
    months
        .wrapping_mul(AVG_MONTH_SECONDS)
        .wrapping_add(days.wrapping_mul(AVG_DAY_SECONDS))
        .wrapping_add(seconds)
}

/// Seconds component recovered from the stored total.
pub fn seconds_of(total_avg_seconds: i64, months: i64, days: i64) -> i64 {
    total_avg_seconds
        .wrapping_sub(months.wrapping_mul(AVG_MONTH_SECONDS))
        .wrapping_sub(days.wrapping_mul(AVG_DAY_SECONDS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_offsets_sign_extend() {
        for offset in [-MAX_OFFSET_SECONDS, -3600, -1, 0, 1, 19_800, MAX_OFFSET_SECONDS] {
            let raw = encode_zone(NO_ZONE_ID, offset);
            assert_eq!(raw & ZONE_ID_FLAG, 0);
            assert_eq!(decode_zone(raw), (NO_ZONE_ID, offset));
        }
    }

    #[test]
    fn zone_ids_carry_flag() {
        let id = zone_id_of(chrono_tz::Europe::Stockholm);
        let raw = encode_zone(id, 0);
        assert_ne!(raw & ZONE_ID_FLAG, 0);
        assert_eq!(decode_zone(raw), (id, 0));
        assert_eq!(zone_of_id(id), Some(chrono_tz::Europe::Stockholm));
        assert!(id <= ZONE_ID_MASK as i64);
    }

    #[test]
    fn same_instant_orders_by_offset_then_kind() {
        let stockholm = zone_id_of(chrono_tz::Europe::Stockholm);
        // 2020-01-01T00:00:00Z, Stockholm is +01:00 in winter
        let at = 1_577_836_800;
        let plus_one = ZonedDateTimeFields {
            epoch_second: at,
            nano: 0,
            zone_id: NO_ZONE_ID,
            offset_seconds: 3600,
        };
        let named = ZonedDateTimeFields {
            zone_id: stockholm,
            offset_seconds: 0,
            ..plus_one
        };
        let utc = ZonedDateTimeFields {
            offset_seconds: 0,
            ..plus_one
        };
        assert_eq!(compare_zoned_date_time(&utc, &plus_one), Ordering::Less);
        assert_eq!(compare_zoned_date_time(&plus_one, &named), Ordering::Less);
        assert_eq!(compare_zoned_date_time(&named, &named), Ordering::Equal);
    }

    #[test]
    fn garbage_offsets_do_not_materialize() {
        let a = ZonedDateTimeFields {
            epoch_second: 5,
            nano: 0,
            zone_id: NO_ZONE_ID,
            offset_seconds: i64::MAX,
        };
        let b = ZonedDateTimeFields {
            offset_seconds: 0,
            ..a
        };
        assert_eq!(compare_zoned_date_time(&a, &b), Ordering::Equal);
    }

    #[test]
    fn duration_seconds_roundtrip() {
        let total = total_avg_seconds(14, 3, -20);
        assert_eq!(seconds_of(total, 14, 3), -20);
    }
}
