//! Per-partition offset bookkeeping.
//!
//! - [`ConsumedOffsets`]: last applied offset per partition, owned by the
//!   consumption loop and published to readers as snapshots
//! - [`Watermarks`] / [`EndOffsets`]: the log's low and high watermark per
//!   partition at one instant

use std::collections::BTreeMap;

/// Low and high watermark of one partition.
///
/// `high` is the offset the log will assign to the next record, so the
/// newest existing record has offset `high - 1`. Records below `low` have
/// been removed by retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    /// First offset still present in the partition.
    pub low: i64,
    /// Next offset to be assigned.
    pub high: i64,
}

impl Watermarks {
    /// Creates watermarks for a partition.
    #[must_use]
    pub fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    /// Returns `true` if the partition currently holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.high <= self.low
    }

    /// Offset of the newest record, if any.
    #[must_use]
    pub fn last_offset(&self) -> Option<i64> {
        (!self.is_empty()).then(|| self.high - 1)
    }
}

/// Snapshot of every partition's watermarks for one topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOffsets {
    partitions: BTreeMap<i32, Watermarks>,
}

impl EndOffsets {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the watermarks of a partition.
    pub fn insert(&mut self, partition: i32, watermarks: Watermarks) {
        self.partitions.insert(partition, watermarks);
    }

    /// Gets the watermarks of a partition.
    #[must_use]
    pub fn get(&self, partition: i32) -> Option<Watermarks> {
        self.partitions.get(&partition).copied()
    }

    /// Iterates partitions in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, Watermarks)> + '_ {
        self.partitions.iter().map(|(p, w)| (*p, *w))
    }

    /// Returns the number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Returns `true` if every partition is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(Watermarks::is_empty)
    }
}

impl FromIterator<(i32, Watermarks)> for EndOffsets {
    fn from_iter<I: IntoIterator<Item = (i32, Watermarks)>>(iter: I) -> Self {
        Self {
            partitions: iter.into_iter().collect(),
        }
    }
}

/// Last applied offset per partition.
///
/// Offsets stored are the last-consumed offset (not the next offset to
/// fetch). Values only move forward: [`advance`](Self::advance) ignores
/// anything at or below the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumedOffsets {
    offsets: BTreeMap<i32, i64>,
}

impl ConsumedOffsets {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves a partition forward to `offset`.
    ///
    /// Returns `true` if the stored offset changed.
    pub fn advance(&mut self, partition: i32, offset: i64) -> bool {
        if offset < 0 {
            return false;
        }
        match self.offsets.get_mut(&partition) {
            Some(current) if *current >= offset => false,
            Some(current) => {
                *current = offset;
                true
            }
            None => {
                self.offsets.insert(partition, offset);
                true
            }
        }
    }

    /// Gets the last applied offset of a partition.
    #[must_use]
    pub fn get(&self, partition: i32) -> Option<i64> {
        self.offsets.get(&partition).copied()
    }

    /// Returns `true` if `offset` on `partition` has already been applied.
    #[must_use]
    pub fn covers(&self, partition: i32, offset: i64) -> bool {
        self.get(partition).is_some_and(|last| offset <= last)
    }

    /// Iterates partitions in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, i64)> + '_ {
        self.offsets.iter().map(|(p, o)| (*p, *o))
    }

    /// Returns the number of tracked partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.offsets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_and_get() {
        let mut offsets = ConsumedOffsets::new();
        assert!(offsets.advance(0, 100));
        assert!(offsets.advance(1, 200));

        assert_eq!(offsets.get(0), Some(100));
        assert_eq!(offsets.get(1), Some(200));
        assert_eq!(offsets.get(2), None);
        assert_eq!(offsets.partition_count(), 2);
    }

    #[test]
    fn test_advance_never_decreases() {
        let mut offsets = ConsumedOffsets::new();
        offsets.advance(0, 100);
        assert!(!offsets.advance(0, 50));
        assert!(!offsets.advance(0, 100));
        assert_eq!(offsets.get(0), Some(100));
        assert!(offsets.advance(0, 101));
        assert_eq!(offsets.get(0), Some(101));
    }

    #[test]
    fn test_advance_ignores_negative() {
        let mut offsets = ConsumedOffsets::new();
        assert!(!offsets.advance(0, -1));
        assert_eq!(offsets.get(0), None);
    }

    #[test]
    fn test_covers() {
        let mut offsets = ConsumedOffsets::new();
        assert!(!offsets.covers(0, 0));
        offsets.advance(0, 5);
        assert!(offsets.covers(0, 5));
        assert!(offsets.covers(0, 3));
        assert!(!offsets.covers(0, 6));
        assert!(!offsets.covers(1, 0));
    }

    #[test]
    fn test_watermarks() {
        assert!(Watermarks::new(0, 0).is_empty());
        assert!(Watermarks::new(7, 7).is_empty());
        assert_eq!(Watermarks::new(0, 0).last_offset(), None);
        assert_eq!(Watermarks::new(3, 10).last_offset(), Some(9));
    }

    #[test]
    fn test_end_offsets() {
        let end: EndOffsets = [(1, Watermarks::new(0, 4)), (0, Watermarks::new(0, 0))]
            .into_iter()
            .collect();
        assert_eq!(end.partition_count(), 2);
        assert!(!end.is_empty());
        assert_eq!(end.get(1), Some(Watermarks::new(0, 4)));
        let ids: Vec<i32> = end.iter().map(|(p, _)| p).collect();
        assert_eq!(ids, vec![0, 1]);
        assert!(EndOffsets::new().is_empty());
    }
}
