use crate::utils::num::i64_to_u32_saturating;
use bson::oid::ObjectId;
use bson::{Document, doc};
use chrono::{DateTime, Utc};

/// ObjectId whose timestamp part is `at` (whole seconds) and whose other 8 bytes are zero.
///
/// It sorts before every generated id from the same second, which makes it a usable range bound.
#[must_use]
pub fn object_id_from_time(at: DateTime<Utc>) -> ObjectId {
    let secs = i64_to_u32_saturating(at.timestamp());
    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(&secs.to_be_bytes());
    ObjectId::from_bytes(bytes)
}

/// `{ "$gt": oid(start), "$lt": oid(end) }`, meant for the `_id` field.
///
/// The bounds are not checked: `start > end` yields a range that matches nothing.
#[must_use]
pub fn time_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Document {
    doc! { "$gt": object_id_from_time(start), "$lt": object_id_from_time(end) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_is_big_endian_prefix() {
        let at = Utc.timestamp_opt(0x0102_0304, 0).unwrap();
        let oid = object_id_from_time(at);
        assert_eq!(oid.bytes(), [1, 2, 3, 4, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn sub_second_precision_is_dropped() {
        let a = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let b = Utc.timestamp_opt(1_700_000_000, 999_000_000).unwrap();
        assert_eq!(object_id_from_time(a), object_id_from_time(b));
    }

    #[test]
    fn pre_epoch_times_clamp_to_zero() {
        let at = Utc.timestamp_opt(-10, 0).unwrap();
        assert_eq!(object_id_from_time(at).bytes(), [0u8; 12]);
    }

    #[test]
    fn range_has_exclusive_bounds_in_order() {
        let start = Utc.timestamp_opt(100, 0).unwrap();
        let end = Utc.timestamp_opt(200, 0).unwrap();
        let range = time_range(start, end);
        let keys: Vec<&str> = range.keys().map(String::as_str).collect();
        assert_eq!(keys, ["$gt", "$lt"]);
        assert!(range.get_object_id("$gt").unwrap() < range.get_object_id("$lt").unwrap());
    }
}
