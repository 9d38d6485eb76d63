//! Generic time-to-live cache.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::SharedClock;

/// A cached value and the instant it stops being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at_millis: i64,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis > self.expires_at_millis
    }
}

/// A thread-safe keyed cache with one TTL for every entry.
///
/// Entries are replaced, never mutated. `get` checks expiry itself, so a
/// stale value is never returned even if no sweep has run.
pub struct TtlCache<K, V> {
    inner: Arc<DashMap<K, CacheEntry<V>>>,
    ttl_millis: i64,
    clock: SharedClock,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            ttl_millis: self.ttl_millis,
            clock: self.clock.clone(),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            ttl_millis: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            clock,
        }
    }

    /// Store `value`, replacing any previous entry for `key`.
    pub fn put(&self, key: K, value: V) {
        let expires_at_millis = self.clock.now_millis().saturating_add(self.ttl_millis);
        self.inner.insert(
            key,
            CacheEntry {
                value,
                expires_at_millis,
            },
        );
    }

    /// The live value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now_millis();
        match self.inner.get(key) {
            None => return None,
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
        }
        // Only drop the entry if no fresher put replaced it meanwhile.
        self.inner.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.inner.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut removed = 0;
        self.inner.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache(ttl_secs: u64) -> (TtlCache<String, u64>, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let cache = TtlCache::new(Duration::from_secs(ttl_secs), Arc::new(clock.clone()));
        (cache, clock)
    }

    #[test]
    fn test_get_before_and_after_ttl() {
        let (cache, clock) = cache(10);
        cache.put("k".to_string(), 5);

        clock.advance_millis(9_999);
        assert_eq!(cache.get(&"k".to_string()), Some(5));

        clock.advance_millis(10_000);
        assert_eq!(cache.get(&"k".to_string()), None);
        // Lazily dropped on the expired read.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_boundary_is_still_live() {
        let (cache, clock) = cache(1);
        cache.put("k".to_string(), 1);
        clock.advance_millis(1_000);
        assert_eq!(cache.get(&"k".to_string()), Some(1));
        clock.advance_millis(1);
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[test]
    fn test_put_replaces_and_refreshes_expiry() {
        let (cache, clock) = cache(10);
        cache.put("k".to_string(), 1);
        clock.advance_millis(8_000);
        cache.put("k".to_string(), 2);
        clock.advance_millis(8_000);
        assert_eq!(cache.get(&"k".to_string()), Some(2));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let (cache, _clock) = cache(10);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);

        assert!(cache.invalidate(&"a".to_string()));
        assert!(!cache.invalidate(&"a".to_string()));
        assert_eq!(cache.get(&"a".to_string()), None);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_without_expired_entries_is_noop() {
        let (cache, clock) = cache(10);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        clock.advance_millis(5_000);

        assert_eq!(cache.sweep(), 0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.sweep(), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (cache, clock) = cache(10);
        cache.put("old".to_string(), 1);
        clock.advance_millis(6_000);
        cache.put("new".to_string(), 2);
        clock.advance_millis(6_000);

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"new".to_string()), Some(2));
    }

    #[test]
    fn test_concurrent_access() {
        let (cache, _clock) = cache(60);
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200u64 {
                        let key = format!("{}-{}", t, i % 10);
                        cache.put(key.clone(), i);
                        assert!(cache.get(&key).is_some());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 80);
    }
}
