use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::Mp4Error;

/// Single-byte chars from `[u8; 4]`.
/// Maps 0-255 to `char`, exceeding ascii.
pub(crate) fn chars_from_bytes(bytes: [u8; 4]) -> [char; 4] {
    [
        bytes[0] as char,
        bytes[1] as char,
        bytes[2] as char,
        bytes[3] as char,
    ]
}

/// Counted string.
/// First byte is the character count, remaining bytes
/// up to that count are the string.
pub(crate) fn counted_string(bytes: &[u8], ignore_null: bool) -> String {
    let Some((count, rest)) = bytes.split_first() else {
        return String::new()
    };
    let end = (*count as usize).min(rest.len());
    match ignore_null {
        true => rest[.. end].iter()
            .filter_map(|b| if b != &0 {Some(*b as char)} else {None})
            .collect(),
        false => rest[.. end].iter()
            .map(|b| *b as char)
            .collect(),
    }
}

/// Integer division rounding up.
pub(crate) fn ceil_divide(numerator: usize, denominator: usize) -> usize {
    if denominator == 0 {
        return 0
    }
    numerator.div_ceil(denominator)
}

/// Scales `timestamp` by `multiplier / divisor` without
/// overflowing for large timestamps.
pub(crate) fn scale_large_timestamp(timestamp: i64, multiplier: i64, divisor: i64) -> i64 {
    if divisor == 0 {
        return 0
    }
    if divisor >= multiplier && divisor % multiplier == 0 {
        timestamp / (divisor / multiplier)
    } else if divisor < multiplier && multiplier % divisor == 0 {
        timestamp.saturating_mul(multiplier / divisor)
    } else {
        (timestamp as i128 * multiplier as i128 / divisor as i128) as i64
    }
}

/// Empty `Vec` with room for `len` values.
/// Fails instead of aborting if `len` comes from a corrupt table
/// and cannot be allocated.
pub(crate) fn try_vec_with_capacity<T>(len: usize, what: &str) -> Result<Vec<T>, Mp4Error> {
    let mut values = Vec::new();
    values.try_reserve_exact(len)
        .map_err(|_| Mp4Error::InvalidSampleTable(format!("cannot allocate {len} {what} entries")))?;
    Ok(values)
}

/// Index of the last value `<= target`, if any.
pub(crate) fn binary_search_floor(values: &[i64], target: i64) -> Option<usize> {
    values.partition_point(|v| *v <= target).checked_sub(1)
}

/// Index of the first value `>= target`.
/// Equals `values.len()` if all values are smaller.
pub(crate) fn binary_search_ceil(values: &[i64], target: i64) -> usize {
    values.partition_point(|v| *v < target)
}

/// Shared cooperative cancellation flag.
///
/// Checked by `BufferedInput` on every call and by the
/// allocator pool while blocking on backpressure.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
