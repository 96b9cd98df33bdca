use std::iter::Cycle;
use std::ops::RangeInclusive;

/// Endless `start, start + 1, ..., end, start, ...` sequence.
///
/// An inverted range (`start > end`) is empty, so the cycle yields nothing.
pub fn cycle(start: u64, end: u64) -> Cycle<RangeInclusive<u64>> {
    (start..=end).cycle()
}
