//! Capacity- and TTL-bounded associative store with O(1) operations.
//!
//! Entries live in an arena of slots linked into an intrusive recency list
//! by index: the slot after the head sentinel is the next eviction
//! candidate, the slot before the tail sentinel was touched most recently.
//! A hash map stores slot handles, never references, so relinking and
//! eviction are pure index surgery.
//!
//! Expiry is sliding: every `get` hit and every `set` pushes the entry's
//! deadline out by the configured TTL. Reclamation happens in batches
//! ("sweeps") piggybacked on mutating calls, never on a background task.
//!
//! # Examples
//! ```
//! use strand_web::Cache;
//! use strand_web::limits::CacheLimits;
//!
//! let cache: Cache<String, Vec<u8>> = Cache::new(CacheLimits {
//!     capacity: 1000,
//!     ..CacheLimits::default()
//! });
//!
//! cache.set("script:/index".to_string(), b"compiled".to_vec()).unwrap();
//! assert_eq!(cache.get(&"script:/index".to_string()), Some(b"compiled".to_vec()));
//! ```

use crate::limits::CacheLimits;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use std::{error, fmt};
use tracing::debug;

const HEAD: usize = 0;
const TAIL: usize = 1;

/// Thread-safe LRU store with sliding TTL expiry.
///
/// Shared freely between connection workers; every operation is one short
/// critical section, so a mutating call (including its sweep) is never
/// interleaved with another mutation.
pub struct Cache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

struct Slot<K, V> {
    key: Option<K>,
    value: Option<V>,
    expires: Instant,
    prev: usize,
    next: usize,
}

struct Inner<K, V> {
    limits: CacheLimits,
    map: HashMap<K, usize>,
    slots: Vec<Slot<K, V>>,
    free: Vec<usize>,
    next_sweep: Instant,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(limits: CacheLimits) -> Self {
        let now = Instant::now();
        let sentinel = |prev, next| Slot {
            key: None,
            value: None,
            expires: now,
            prev,
            next,
        };

        Self {
            inner: Mutex::new(Inner {
                next_sweep: deadline(now, limits.sweep_interval),
                limits,
                map: HashMap::new(),
                slots: vec![sentinel(HEAD, TAIL), sentinel(HEAD, TAIL)],
                free: Vec::new(),
            }),
        }
    }

    /// Inserts or replaces `key`, refreshing its expiry and marking it
    /// most recently used.
    ///
    /// Runs a sweep when the store went over capacity or the sweep
    /// interval elapsed; sweep failures are collected and surfaced in
    /// aggregate once reclamation finished.
    pub fn set(&self, key: K, value: V) -> Result<(), SweepError<K>> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let idx = match inner.map.get(&key).copied() {
            Some(idx) => {
                inner.unlink(idx);
                idx
            }
            None => {
                let idx = inner.alloc(key.clone());
                inner.map.insert(key, idx);
                idx
            }
        };

        let expires = deadline(now, inner.limits.ttl);
        let slot = &mut inner.slots[idx];
        slot.value = Some(value);
        slot.expires = expires;
        inner.link_last(idx);

        if inner.map.len() > inner.limits.capacity || now > inner.next_sweep {
            inner.sweep(now)
        } else {
            Ok(())
        }
    }

    /// Returns the value for `key`, or `None` when the key is unknown or
    /// its entry has already expired.
    ///
    /// A hit refreshes the expiry and bumps recency exactly like `set`; a
    /// lazily-expired entry counts as absent and is reclaimed by an
    /// opportunistic sweep.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let Some(idx) = inner.map.get(key).copied() else {
            if now > inner.next_sweep {
                inner.sweep_logged(now);
            }
            return None;
        };

        if now > inner.slots[idx].expires {
            inner.sweep_logged(now);
            return None;
        }

        let expires = deadline(now, inner.limits.ttl);
        inner.slots[idx].expires = expires;
        let value = inner.slots[idx].value.clone();
        inner.unlink(idx);
        inner.link_last(idx);

        if now > inner.next_sweep {
            inner.sweep_logged(now);
        }
        value
    }

    /// Removes `key` if present, returning its value. Idempotent.
    pub fn remove(&self, key: &K) -> Result<Option<V>, SweepError<K>> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let swept = if now > inner.next_sweep {
            inner.sweep(now)
        } else {
            Ok(())
        };

        let value = match inner.map.remove(key) {
            Some(idx) => {
                inner.unlink(idx);
                let value = inner.slots[idx].value.take();
                inner.release(idx);
                value
            }
            None => None,
        };

        swept.map(|()| value)
    }

    /// Membership probe without a recency bump or expiry check: a stale
    /// entry still counts until the next sweep removes it.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn alloc(&mut self, key: K) -> usize {
        let slot = Slot {
            key: Some(key),
            value: None,
            expires: self.next_sweep,
            prev: HEAD,
            next: TAIL,
        };
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        self.slots[idx].key = None;
        self.slots[idx].value = None;
        self.free.push(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let Slot { prev, next, .. } = self.slots[idx];
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
    }

    fn link_last(&mut self, idx: usize) {
        let prev = self.slots[TAIL].prev;
        self.slots[idx].prev = prev;
        self.slots[idx].next = TAIL;
        self.slots[prev].next = idx;
        self.slots[TAIL].prev = idx;
    }

    /// Two-phase batch reclamation, walking from the eviction end: first
    /// every already-expired entry, then (if still over capacity) entries
    /// by pure recency. Walks only what it removes, so the amortized cost
    /// per mutating call stays O(1).
    ///
    /// A key whose map entry is already gone must not stop the pass; such
    /// keys are collected and returned in one aggregate error.
    fn sweep(&mut self, now: Instant) -> Result<(), SweepError<K>> {
        self.next_sweep = deadline(now, self.limits.sweep_interval);

        let mut stuck = Vec::new();
        let mut idx = self.slots[HEAD].next;
        while idx != TAIL && now > self.slots[idx].expires {
            idx = self.evict(idx, &mut stuck);
        }
        while idx != TAIL && self.map.len() > self.limits.capacity {
            idx = self.evict(idx, &mut stuck);
        }

        if stuck.is_empty() {
            Ok(())
        } else {
            Err(SweepError { keys: stuck })
        }
    }

    fn sweep_logged(&mut self, now: Instant) {
        if let Err(err) = self.sweep(now) {
            debug!(stuck = err.keys.len(), "cache sweep left stuck keys");
        }
    }

    fn evict(&mut self, idx: usize, stuck: &mut Vec<K>) -> usize {
        let next = self.slots[idx].next;
        if let Some(key) = self.slots[idx].key.take() {
            if self.map.remove(&key).is_none() {
                stuck.push(key);
            }
        }
        self.slots[idx].value = None;
        self.free.push(idx);
        self.slots[HEAD].next = next;
        self.slots[next].prev = HEAD;
        next
    }
}

/// Saturating `now + after`, so unbounded TTLs degrade to pure LRU
/// behavior instead of overflowing `Instant`.
fn deadline(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365 * 30))
}

/// Aggregate of per-key removal failures from one sweep pass.
#[derive(Debug)]
pub struct SweepError<K> {
    pub keys: Vec<K>,
}

impl<K: fmt::Debug> fmt::Display for SweepError<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache sweep failed to release {} key(s): {:?}",
            self.keys.len(),
            self.keys
        )
    }
}

impl<K: fmt::Debug> error::Error for SweepError<K> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn limits(capacity: usize, ttl: Duration, sweep: Duration) -> CacheLimits {
        CacheLimits {
            capacity,
            ttl,
            sweep_interval: sweep,
            ..CacheLimits::default()
        }
    }

    const LONG: Duration = Duration::from_secs(600);

    #[test]
    fn capacity_is_never_exceeded_after_a_mutating_call() {
        let cache = Cache::new(limits(3, LONG, LONG));

        for i in 0..10 {
            cache.set(i, i * 10).unwrap();
            assert!(cache.len() <= 3, "len {} after set {}", cache.len(), i);
        }
    }

    #[test]
    fn eviction_follows_recency() {
        let cache = Cache::new(limits(3, LONG, LONG));
        cache.set("a", 1).unwrap();
        cache.set("b", 2).unwrap();
        cache.set("c", 3).unwrap();

        // Touch the oldest entry, then push one past capacity.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.set("d", 4).unwrap();

        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert!(cache.contains(&"d"));
    }

    #[test]
    fn lazy_expiry_and_opportunistic_sweep() {
        let cache = Cache::new(limits(100, Duration::from_millis(20), LONG));
        cache.set("k", 1).unwrap();
        sleep(Duration::from_millis(60));

        // `contains` is a pure membership probe: stale entries count.
        assert!(cache.contains(&"k"));
        // `get` treats the expired entry as absent and sweeps it out.
        assert_eq!(cache.get(&"k"), None);
        assert!(!cache.contains(&"k"));
    }

    #[test]
    fn get_slides_the_expiry_window() {
        let cache = Cache::new(limits(100, Duration::from_millis(200), LONG));
        cache.set("k", 1).unwrap();

        for _ in 0..3 {
            sleep(Duration::from_millis(50));
            assert_eq!(cache.get(&"k"), Some(1));
        }

        sleep(Duration::from_millis(400));
        assert_eq!(cache.get(&"k"), None);
    }

    #[test]
    fn interval_sweep_reclaims_expired_entries_on_set() {
        let cache = Cache::new(limits(usize::MAX, Duration::from_millis(10), Duration::ZERO));
        cache.set("old", 1).unwrap();
        sleep(Duration::from_millis(30));

        cache.set("new", 2).unwrap();
        assert!(!cache.contains(&"old"));
        assert!(cache.contains(&"new"));
    }

    #[test]
    fn remove_is_idempotent() {
        let cache = Cache::new(limits(10, LONG, LONG));
        cache.set("k", 7).unwrap();

        assert_eq!(cache.remove(&"k").unwrap(), Some(7));
        assert_eq!(cache.remove(&"k").unwrap(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn replacing_a_key_keeps_a_single_entry() {
        let cache = Cache::new(limits(10, LONG, LONG));
        cache.set("k", 1).unwrap();
        cache.set("k", 2).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"k"), Some(2));
    }

    #[test]
    fn unbounded_capacity_degrades_to_pure_ttl() {
        let cache = Cache::new(limits(
            usize::MAX,
            Duration::from_millis(20),
            Duration::ZERO,
        ));
        for i in 0..50 {
            cache.set(i, i).unwrap();
        }
        assert_eq!(cache.len(), 50);

        sleep(Duration::from_millis(50));
        cache.set(99, 99).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn slots_are_reused_after_eviction() {
        let cache = Cache::new(limits(2, LONG, LONG));
        for i in 0..100 {
            cache.set(i, i).unwrap();
        }

        let inner = cache.inner.lock();
        // Two sentinels plus at most capacity + 1 live/free data slots.
        assert!(inner.slots.len() <= 2 + 3);
    }
}
