//! Consumer lag accounting.
//!
//! Lag is the number of records present in the log that the consumption
//! loop has not applied yet, summed over partitions. It is computed on
//! demand from a fresh [`EndOffsets`] snapshot and is a monitoring signal
//! only.

use crate::offsets::{ConsumedOffsets, EndOffsets, Watermarks};

/// Lag of a single partition.
///
/// A partition with nothing consumed yet counts from its low watermark,
/// which is offset 0 unless retention removed older records.
#[must_use]
#[allow(clippy::cast_sign_loss)] // clamped to >= 0 before the cast
pub fn partition_lag(watermarks: Watermarks, consumed: Option<i64>) -> u64 {
    if watermarks.is_empty() {
        return 0;
    }
    let position = consumed.map_or(watermarks.low, |offset| (offset + 1).max(watermarks.low));
    (watermarks.high - position).max(0) as u64
}

/// Total lag over every partition in `end`.
///
/// Partitions the loop has consumed but that are missing from `end` do not
/// contribute.
#[must_use]
pub fn consumer_lag(end: &EndOffsets, consumed: &ConsumedOffsets) -> u64 {
    end.iter()
        .map(|(partition, watermarks)| partition_lag(watermarks, consumed.get(partition)))
        .fold(0u64, u64::saturating_add)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_partition_has_no_lag() {
        assert_eq!(partition_lag(Watermarks::new(0, 0), None), 0);
        assert_eq!(partition_lag(Watermarks::new(12, 12), Some(3)), 0);
    }

    #[test]
    fn test_nothing_consumed_counts_all_records() {
        assert_eq!(partition_lag(Watermarks::new(0, 10), None), 10);
    }

    #[test]
    fn test_caught_up_partition() {
        assert_eq!(partition_lag(Watermarks::new(0, 10), Some(9)), 0);
    }

    #[test]
    fn test_partially_consumed() {
        assert_eq!(partition_lag(Watermarks::new(0, 10), Some(4)), 5);
    }

    #[test]
    fn test_consumed_beyond_snapshot_is_zero() {
        // The snapshot may be older than the loop's progress.
        assert_eq!(partition_lag(Watermarks::new(0, 10), Some(15)), 0);
    }

    #[test]
    fn test_retention_raises_baseline() {
        assert_eq!(partition_lag(Watermarks::new(90, 100), None), 10);
        assert_eq!(partition_lag(Watermarks::new(90, 100), Some(20)), 10);
    }

    #[test]
    fn test_consumer_lag_sums_partitions() {
        let end: EndOffsets = [
            (0, Watermarks::new(0, 10)),
            (1, Watermarks::new(0, 5)),
            (2, Watermarks::new(0, 0)),
        ]
        .into_iter()
        .collect();
        let mut consumed = ConsumedOffsets::new();
        consumed.advance(0, 7);

        assert_eq!(consumer_lag(&end, &consumed), 2 + 5);

        consumed.advance(0, 9);
        consumed.advance(1, 4);
        assert_eq!(consumer_lag(&end, &consumed), 0);
    }

    #[test]
    fn test_consumer_lag_ignores_unknown_partitions() {
        let end: EndOffsets = [(0, Watermarks::new(0, 1))].into_iter().collect();
        let mut consumed = ConsumedOffsets::new();
        consumed.advance(0, 0);
        consumed.advance(9, 100);
        assert_eq!(consumer_lag(&end, &consumed), 0);
    }
}
