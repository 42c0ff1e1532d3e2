//! Numeric utilities: saturating and lossless integer conversions in one searchable place.
//!
//! Wire values (`$skip`, `$limit`, counts) are signed 64-bit in BSON while Rust-side sizes are
//! unsigned; everything crossing that boundary goes through these helpers.

#[inline]
#[must_use]
pub fn usize_to_u64(v: usize) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

#[inline]
#[must_use]
pub fn u64_to_usize_saturating(v: u64) -> usize {
    usize::try_from(v).unwrap_or(usize::MAX)
}

#[inline]
#[must_use]
pub fn u64_to_i64_saturating(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[inline]
#[must_use]
pub fn i64_to_u64_saturating_nonnegative(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

/// Unix seconds into the 32-bit field of an ObjectId; out-of-range values clamp to the nearest end.
#[inline]
#[must_use]
pub fn i64_to_u32_saturating(v: i64) -> u32 {
    if v <= 0 { 0 } else { u32::try_from(v).unwrap_or(u32::MAX) }
}

#[inline]
#[must_use]
pub fn u128_to_u64_saturating(v: u128) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i64_to_u64_nonneg_saturating() {
        assert_eq!(i64_to_u64_saturating_nonnegative(-5), 0);
        assert_eq!(i64_to_u64_saturating_nonnegative(0), 0);
        assert_eq!(i64_to_u64_saturating_nonnegative(7), 7);
    }

    #[test]
    fn u64_to_i64_clamps_at_max() {
        assert_eq!(u64_to_i64_saturating(10), 10);
        assert_eq!(u64_to_i64_saturating(u64::MAX), i64::MAX);
    }

    #[test]
    fn unix_seconds_clamp_into_u32() {
        assert_eq!(i64_to_u32_saturating(-1), 0);
        assert_eq!(i64_to_u32_saturating(1_700_000_000), 1_700_000_000);
        assert_eq!(i64_to_u32_saturating(i64::from(u32::MAX) + 1), u32::MAX);
    }

    #[test]
    fn u128_to_u64_saturating_edges() {
        assert_eq!(u128_to_u64_saturating(0), 0);
        assert_eq!(u128_to_u64_saturating(u128::from(u64::MAX)), u64::MAX);
        assert_eq!(u128_to_u64_saturating(u128::MAX), u64::MAX);
    }
}
