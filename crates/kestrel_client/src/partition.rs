//! Key to shard mapping.

use xxhash_rust::xxh3::xxh3_64;

use kestrel_common::{KestrelError, KestrelResult};

/// Map a composed routing key onto one of `partition_count` shards.
///
/// Deterministic across processes for a fixed partition count; the same
/// key always lands on the same shard so readers and writers agree.
pub fn resolve_partition(key: &str, partition_count: usize) -> KestrelResult<u32> {
    if partition_count == 0 {
        return Err(KestrelError::NoPartitions);
    }
    Ok((xxh3_64(key.as_bytes()) % partition_count as u64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_is_deterministic() {
        for key in ["card-001", "", "user|2024", "\u{1f980}"] {
            assert_eq!(
                resolve_partition(key, 8).unwrap(),
                resolve_partition(key, 8).unwrap()
            );
        }
    }

    #[test]
    fn test_resolution_stays_in_range() {
        for i in 0..1000 {
            let pid = resolve_partition(&format!("key-{i}"), 7).unwrap();
            assert!(pid < 7);
        }
    }

    #[test]
    fn test_zero_partitions_is_an_error() {
        assert!(matches!(
            resolve_partition("k", 0),
            Err(KestrelError::NoPartitions)
        ));
    }

    #[test]
    fn test_spread_over_shards() {
        // not a uniformity proof, just a guard against a constant hash
        let mut seen = std::collections::HashSet::new();
        for i in 0..100 {
            seen.insert(resolve_partition(&format!("key-{i}"), 16).unwrap());
        }
        assert!(seen.len() > 8);
    }
}
