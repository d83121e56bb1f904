//! Key-based partition selection.
//!
//! Every write for one feature must land on the same partition so that the
//! per-partition offset order is also the per-key write order. The
//! [`partition_for_key`] function uses Murmur2, the hash Kafka's Java
//! `DefaultPartitioner` applies to record keys, so in-process logs and
//! Kafka topics route the same key to the same partition.

/// Returns the partition for `key` out of `num_partitions`.
///
/// Returns `None` when the topic has no partitions.
#[must_use]
pub fn partition_for_key(key: &[u8], num_partitions: i32) -> Option<i32> {
    if num_partitions <= 0 {
        return None;
    }
    let hash = murmur2(key) & 0x7fff_ffff;
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    let partition = (hash % num_partitions as u32) as i32;
    Some(partition)
}

/// Murmur2 hash function compatible with Kafka's `DefaultPartitioner`.
///
/// This is the 32-bit version used by Kafka for key-based partitioning.
fn murmur2(data: &[u8]) -> u32 {
    let seed: u32 = 0x9747_b28c;
    let m: u32 = 0x5bd1_e995;
    let r: u32 = 24;

    let len = data.len();
    #[allow(clippy::cast_possible_truncation)] // seed is XORed with the 32-bit length
    let mut h: u32 = seed ^ (len as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(m);
        k ^= k >> r;
        k = k.wrapping_mul(m);
        h = h.wrapping_mul(m);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(m);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(m);
    h ^= h >> 15;

    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur2_deterministic() {
        let h1 = murmur2(b"FEATURE_A");
        let h2 = murmur2(b"FEATURE_A");
        assert_eq!(h1, h2);
        assert_ne!(h1, murmur2(b"FEATURE_B"));
    }

    #[test]
    fn test_murmur2_tail_lengths() {
        // Inputs of length 1..=7 cover every remainder branch.
        let hashes: Vec<u32> = (1..=7).map(|n| murmur2(&b"abcdefg"[..n])).collect();
        for (i, a) in hashes.iter().enumerate() {
            for b in &hashes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_partition_in_range_and_stable() {
        for key in ["FEATURE_A", "FEATURE_B", "UNUSED_FEATURE", ""] {
            let p = partition_for_key(key.as_bytes(), 5).unwrap();
            assert!((0..5).contains(&p));
            assert_eq!(partition_for_key(key.as_bytes(), 5), Some(p));
        }
    }

    #[test]
    fn test_single_partition() {
        assert_eq!(partition_for_key(b"anything", 1), Some(0));
    }

    #[test]
    fn test_no_partitions() {
        assert_eq!(partition_for_key(b"anything", 0), None);
    }
}
