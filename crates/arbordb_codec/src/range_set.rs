//! Sets and bitmaps over unsigned 64-bit identifiers.

use crate::error::{CodecError, CodecResult};
use crate::io::{DataInput, DataOutput};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::ops::RangeInclusive;

/// A set of `u64` stored as minimal disjoint closed ranges.
///
/// Adjacent and overlapping ranges are merged on insertion, so two sets
/// holding the same members always have the same representation.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct UnsignedLongSet {
    /// Range start to inclusive range end.
    ranges: BTreeMap<u64, u64>,
}

impl UnsignedLongSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the number of disjoint ranges.
    #[must_use]
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Whether `value` is a member.
    #[must_use]
    pub fn contains(&self, value: u64) -> bool {
        self.ranges
            .range(..=value)
            .next_back()
            .is_some_and(|(_, end)| value <= *end)
    }

    /// Adds a single value.
    pub fn add(&mut self, value: u64) {
        self.add_range(value, value);
    }

    /// Adds every value in `lower..=upper`.
    ///
    /// # Panics
    ///
    /// Panics if `lower > upper`.
    pub fn add_range(&mut self, lower: u64, upper: u64) {
        assert!(lower <= upper, "invalid range {lower}..={upper}");
        let mut start = lower;
        let mut end = upper;

        // A range ending at or just before `lower` absorbs the new one.
        if let Some((&prev_start, &prev_end)) = self.ranges.range(..=lower).next_back() {
            if prev_end.saturating_add(1) >= lower {
                start = prev_start;
                end = end.max(prev_end);
            }
        }

        // Swallow every range starting inside or right after the merged span.
        let absorbed: Vec<u64> = self
            .ranges
            .range(start..)
            .take_while(|&(&next_start, _)| next_start <= end.saturating_add(1))
            .map(|(&next_start, _)| next_start)
            .collect();
        for next_start in absorbed {
            if let Some(next_end) = self.ranges.remove(&next_start) {
                end = end.max(next_end);
            }
        }
        self.ranges.insert(start, end);
    }

    /// Adds every member of `other`.
    pub fn add_all(&mut self, other: &Self) {
        for range in other.ranges() {
            self.add_range(*range.start(), *range.end());
        }
    }

    /// Iterates over the ranges in ascending order.
    pub fn ranges(&self) -> impl Iterator<Item = RangeInclusive<u64>> + '_ {
        self.ranges.iter().map(|(&start, &end)| start..=end)
    }

    /// Writes the set as an i32 range count followed by packed bounds.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        out.write_len(self.ranges.len())?;
        for (&start, &end) in &self.ranges {
            out.write_longs(start, end)?;
        }
        Ok(())
    }

    /// Reads a set written by [`write_to`](Self::write_to).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::CorruptStream`] for inverted ranges.
    pub fn read_from<R: Read + ?Sized>(input: &mut R) -> CodecResult<Self> {
        let count = input.read_len()?;
        let mut set = Self::new();
        for _ in 0..count {
            let (start, end) = input.read_longs()?;
            if start > end {
                return Err(CodecError::corrupt_stream(format!(
                    "inverted range {start}..={end}"
                )));
            }
            set.add_range(start, end);
        }
        Ok(set)
    }
}

impl fmt::Debug for UnsignedLongSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ranges()).finish()
    }
}

impl FromIterator<u64> for UnsignedLongSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.add(value);
        }
        set
    }
}

/// A sparse `u64 -> bool` map, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UnsignedLongBitmap {
    bits: BTreeMap<u64, bool>,
}

impl UnsignedLongBitmap {
    /// Creates an empty bitmap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no key is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Returns the value stored for `key`.
    #[must_use]
    pub fn get(&self, key: u64) -> Option<bool> {
        self.bits.get(&key).copied()
    }

    /// Sets `key` to `value`, returning the previous value.
    pub fn set(&mut self, key: u64, value: bool) -> Option<bool> {
        self.bits.insert(key, value)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: u64) -> Option<bool> {
        self.bits.remove(&key)
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, bool)> + '_ {
        self.bits.iter().map(|(&key, &value)| (key, value))
    }

    /// Writes an i32 entry count followed by the entries.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        out.write_len(self.bits.len())?;
        for (&key, &value) in &self.bits {
            out.write_long(key)?;
            out.write_bool(value)?;
        }
        Ok(())
    }

    /// Reads a bitmap written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read + ?Sized>(input: &mut R) -> CodecResult<Self> {
        let count = input.read_len()?;
        let mut bits = BTreeMap::new();
        for _ in 0..count {
            let key = input.read_long()?;
            let value = input.read_bool()?;
            if bits.insert(key, value).is_some() {
                return Err(CodecError::corrupt_stream(format!(
                    "duplicate bitmap key {key}"
                )));
            }
        }
        Ok(Self { bits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collect(set: &UnsignedLongSet) -> Vec<(u64, u64)> {
        set.ranges().map(|r| (*r.start(), *r.end())).collect()
    }

    #[test]
    fn adjacent_values_merge() {
        let set: UnsignedLongSet = [1, 2, 3, 5, 7, 6].into_iter().collect();
        assert_eq!(collect(&set), vec![(1, 3), (5, 7)]);
        assert!(set.contains(6));
        assert!(!set.contains(4));
        assert!(!set.contains(0));
        assert!(!set.contains(8));
    }

    #[test]
    fn bridging_range_collapses_neighbours() {
        let mut set = UnsignedLongSet::new();
        set.add_range(0, 2);
        set.add_range(10, 12);
        set.add_range(20, 22);
        set.add_range(3, 19);
        assert_eq!(collect(&set), vec![(0, 22)]);
    }

    #[test]
    fn extremes_do_not_overflow() {
        let mut set = UnsignedLongSet::new();
        set.add(u64::MAX);
        set.add(u64::MAX - 1);
        set.add(0);
        assert_eq!(collect(&set), vec![(0, 0), (u64::MAX - 1, u64::MAX)]);
    }

    #[test]
    fn set_encoding() {
        let mut set = UnsignedLongSet::new();
        set.add_range(1, 0x0100);
        let mut buf = Vec::new();
        set.write_to(&mut buf).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 1, 0x12, 0x01, 0x01, 0x00]);
        assert_eq!(UnsignedLongSet::read_from(&mut buf.as_slice()).unwrap(), set);
    }

    #[test]
    fn inverted_range_is_corrupt() {
        let mut buf = Vec::new();
        buf.write_i32(1).unwrap();
        buf.write_longs(5, 1).unwrap();
        assert!(matches!(
            UnsignedLongSet::read_from(&mut buf.as_slice()),
            Err(CodecError::CorruptStream { .. })
        ));
    }

    #[test]
    fn bitmap_roundtrip_and_duplicates() {
        let mut bitmap = UnsignedLongBitmap::new();
        bitmap.set(3, true);
        bitmap.set(1, false);
        let mut buf = Vec::new();
        bitmap.write_to(&mut buf).unwrap();
        let read = UnsignedLongBitmap::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(read, bitmap);
        assert_eq!(read.iter().collect::<Vec<_>>(), vec![(1, false), (3, true)]);

        let mut dup = Vec::new();
        dup.write_i32(2).unwrap();
        dup.write_long(4).unwrap();
        dup.write_bool(true).unwrap();
        dup.write_long(4).unwrap();
        dup.write_bool(false).unwrap();
        assert!(UnsignedLongBitmap::read_from(&mut dup.as_slice()).is_err());
    }

    proptest! {
        #[test]
        fn ranges_stay_minimal(values in prop::collection::vec(0u64..200, 0..100)) {
            let set: UnsignedLongSet = values.iter().copied().collect();
            let ranges = collect(&set);
            for pair in ranges.windows(2) {
                // disjoint and separated by at least one missing value
                prop_assert!(pair[0].1 + 1 < pair[1].0);
            }
            for value in 0..200 {
                prop_assert_eq!(set.contains(value), values.contains(&value));
            }
        }
    }
}
