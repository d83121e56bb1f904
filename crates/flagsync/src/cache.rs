//! Local state cache.
//!
//! [`StateCache`] maps feature keys to their latest applied state. Only the
//! consumption loop writes to it; any number of caller threads read from it
//! concurrently through `DashMap`'s sharded locks, so a read never waits on
//! the transport.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::state::{FeatureKey, FeatureState};

/// A cached state plus the log position it was read from.
#[derive(Debug, Clone)]
struct CachedState {
    state: FeatureState,
    partition: i32,
    offset: i64,
}

/// Outcome of [`StateCache::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First state seen for the key.
    Inserted,
    /// A previous state for the key was replaced.
    Replaced,
    /// The update came from an offset at or below the one already applied
    /// for the key on the same partition and was discarded.
    Stale,
}

/// Concurrent feature key to state mapping.
#[derive(Debug, Default)]
pub struct StateCache {
    entries: DashMap<FeatureKey, CachedState>,
}

impl StateCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a state read from `partition` at `offset`.
    ///
    /// An entry is only replaced by a newer offset of the same partition, or
    /// by any offset of another partition.
    pub fn apply(&self, state: FeatureState, partition: i32, offset: i64) -> ApplyOutcome {
        match self.entries.entry(state.key().clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.partition == partition && offset <= current.offset {
                    return ApplyOutcome::Stale;
                }
                occupied.insert(CachedState {
                    state,
                    partition,
                    offset,
                });
                ApplyOutcome::Replaced
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CachedState {
                    state,
                    partition,
                    offset,
                });
                ApplyOutcome::Inserted
            }
        }
    }

    /// Looks up the latest state of a feature.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<FeatureState> {
        self.entries.get(key).map(|entry| entry.state.clone())
    }

    /// Returns the log position the current state of `key` came from.
    #[must_use]
    pub fn origin(&self, key: &str) -> Option<(i32, i64)> {
        self.entries
            .get(key)
            .map(|entry| (entry.partition, entry.offset))
    }

    /// Returns a copy of every cached state, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FeatureState> {
        let mut states: Vec<FeatureState> = self
            .entries
            .iter()
            .map(|entry| entry.state.clone())
            .collect();
        states.sort_by(|a, b| a.key().cmp(b.key()));
        states
    }

    /// Returns the number of cached features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no feature has been applied yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_absent() {
        let cache = StateCache::new();
        assert!(cache.get("FEATURE_A").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_apply_inserts_then_replaces() {
        let cache = StateCache::new();
        let on = FeatureState::new("FEATURE_A").with_enabled(true);
        let off = FeatureState::new("FEATURE_A").with_enabled(false);

        assert_eq!(cache.apply(on, 0, 10), ApplyOutcome::Inserted);
        assert_eq!(cache.apply(off.clone(), 0, 11), ApplyOutcome::Replaced);
        assert_eq!(cache.get("FEATURE_A"), Some(off));
        assert_eq!(cache.origin("FEATURE_A"), Some((0, 11)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_older_offset_same_partition_is_stale() {
        let cache = StateCache::new();
        let newer = FeatureState::new("FEATURE_A").with_enabled(true);
        let older = FeatureState::new("FEATURE_A").with_enabled(false);

        cache.apply(newer.clone(), 2, 50);
        assert_eq!(cache.apply(older.clone(), 2, 49), ApplyOutcome::Stale);
        assert_eq!(cache.apply(older, 2, 50), ApplyOutcome::Stale);
        assert_eq!(cache.get("FEATURE_A"), Some(newer));
    }

    #[test]
    fn test_other_partition_replaces() {
        let cache = StateCache::new();
        cache.apply(FeatureState::new("FEATURE_A").with_enabled(true), 0, 50);
        let moved = FeatureState::new("FEATURE_A").with_strategy("gradual");
        assert_eq!(cache.apply(moved.clone(), 1, 3), ApplyOutcome::Replaced);
        assert_eq!(cache.get("FEATURE_A"), Some(moved));
    }

    #[test]
    fn test_snapshot_sorted_by_key() {
        let cache = StateCache::new();
        cache.apply(FeatureState::new("b"), 0, 0);
        cache.apply(FeatureState::new("a"), 1, 0);
        let keys: Vec<String> = cache
            .snapshot()
            .iter()
            .map(|s| s.key().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_concurrent_readers() {
        let cache = std::sync::Arc::new(StateCache::new());
        cache.apply(FeatureState::new("FEATURE_A").with_enabled(true), 0, 0);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = std::sync::Arc::clone(&cache);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        assert!(cache.get("FEATURE_A").unwrap().is_enabled());
                    }
                })
            })
            .collect();
        for offset in 1..100 {
            cache.apply(FeatureState::new("FEATURE_A").with_enabled(true), 0, offset);
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
