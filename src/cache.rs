//! Bounded key/value cache with least-recently-used semantics and
//! slack-batched eviction.
//!
//! Evicting exactly one entry per insert thrashes under bursty writes, so the
//! cache is allowed to grow to `capacity + slack` (slack = ceil(0.3 * capacity))
//! before a single batched pass evicts back down to `capacity`. Size checks
//! run on an explicit [`EvictionCache::maintain`] tick rather than inline with
//! `set`, so a synchronous burst of inserts is observed as one eviction
//! decision, not N.

use lru::LruCache;
use std::hash::Hash;

type DisposeFn<K, V> = Box<dyn FnMut(Vec<(K, V)>)>;

pub struct EvictionCache<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
    capacity: usize,
    slack: usize,
    check_pending: bool,
    dispose: DisposeFn<K, V>,
}

impl<K: Hash + Eq, V> EvictionCache<K, V> {
    /// `dispose` is invoked once per eviction pass with the evicted entries in
    /// oldest-first order; it is the only point where ownership of values
    /// returns to the caller.
    pub fn new(capacity: usize, dispose: impl FnMut(Vec<(K, V)>) + 'static) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: LruCache::unbounded(),
            capacity,
            slack: capacity.saturating_mul(3).div_ceil(10),
            check_pending: false,
            dispose: Box::new(dispose),
        }
    }

    /// Insert or overwrite, marking the key most-recently-used.
    ///
    /// An overwritten value is routed through `dispose` immediately; the size
    /// check itself is deferred to the next `maintain` tick unless the hard
    /// `capacity + slack` bound would be exceeded.
    pub fn set(&mut self, key: K, value: V)
    where
        K: Clone,
    {
        if let Some(prev) = self.entries.put(key.clone(), value) {
            (self.dispose)(vec![(key, prev)]);
        }
        self.check_pending = true;

        if self.entries.len() > self.capacity + self.slack {
            self.evict_excess();
            self.check_pending = false;
        }
    }

    /// On hit, promotes the entry to most-recently-used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Explicit invalidation; the value is handed back to the caller rather
    /// than disposed, since the caller asked for it to go away.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the deferred size check: at most one batched eviction pass.
    ///
    /// Entries between `capacity` and `capacity + slack` are left alone; the
    /// slack exists so slow one-insert-at-a-time workloads do not pay an
    /// eviction per tick.
    pub fn maintain(&mut self) {
        if !self.check_pending {
            return;
        }
        self.check_pending = false;
        if self.entries.len() > self.capacity + self.slack {
            self.evict_excess();
        }
    }

    fn evict_excess(&mut self) {
        let mut batch: Vec<(K, V)> = Vec::new();
        while self.entries.len() > self.capacity {
            match self.entries.pop_lru() {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }
        if !batch.is_empty() {
            (self.dispose)(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn counting_cache(
        capacity: usize,
    ) -> (EvictionCache<String, u32>, Rc<RefCell<Vec<Vec<String>>>>) {
        let log: Rc<RefCell<Vec<Vec<String>>>> = Rc::new(RefCell::new(vec![]));
        let log2 = log.clone();
        let cache = EvictionCache::new(capacity, move |batch: Vec<(String, u32)>| {
            log2.borrow_mut()
                .push(batch.into_iter().map(|(k, _)| k).collect());
        });
        (cache, log)
    }

    #[test]
    fn size_never_exceeds_capacity_plus_slack() {
        let (mut cache, _log) = counting_cache(10); // slack = 3
        for i in 0..40 {
            cache.set(format!("k{i}"), i);
            assert!(cache.len() <= 13, "len {} exceeded N + slack", cache.len());
        }
        cache.maintain();
        assert!(cache.len() <= 13);
    }

    #[test]
    fn growth_within_slack_survives_ticks() {
        let (mut cache, log) = counting_cache(10); // slack = 3
        // One insert per tick: the slack region is never evicted early.
        for i in 0..13 {
            cache.set(format!("k{i}"), i);
            cache.maintain();
        }
        assert_eq!(cache.len(), 13);
        assert!(log.borrow().is_empty(), "within N + slack nothing is evicted");

        cache.set("k13".to_string(), 13); // crosses N + slack
        cache.maintain();
        assert_eq!(cache.len(), 10);
        assert_eq!(log.borrow().len(), 1, "one batched pass back down to N");
    }

    #[test]
    fn burst_coalesces_into_one_eviction_pass() {
        let (mut cache, log) = counting_cache(10); // slack = 3
        for i in 0..14 {
            cache.set(format!("k{i}"), i);
        }
        assert_eq!(log.borrow().len(), 1, "one pass for the whole burst");
        assert_eq!(cache.len(), 10);

        // Tick after the burst has nothing left to do.
        cache.maintain();
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn get_promotes_against_eviction() {
        let (mut cache, log) = counting_cache(3); // slack = 1
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.set("c".to_string(), 3);
        cache.get(&"a".to_string());
        cache.set("d".to_string(), 4);
        cache.set("e".to_string(), 5);
        cache.maintain();

        assert!(cache.contains(&"a".to_string()), "a was promoted by get");
        assert!(!cache.contains(&"b".to_string()), "b was the true LRU");
        assert_eq!(
            log.borrow().as_slice(),
            &[vec!["b".to_string(), "c".to_string()]]
        );
    }

    #[test]
    fn eviction_batch_is_oldest_first() {
        let (mut cache, log) = counting_cache(4); // slack = 2
        for key in ["a", "b", "c", "d", "e", "f", "g"] {
            cache.set(key.to_string(), 0);
        }
        cache.maintain();
        assert_eq!(
            log.borrow().as_slice(),
            &[vec!["a".to_string(), "b".to_string(), "c".to_string()]]
        );
    }

    #[test]
    fn overwrite_disposes_previous_value() {
        let disposed: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(vec![]));
        let d2 = disposed.clone();
        let mut cache = EvictionCache::new(4, move |batch: Vec<(String, u32)>| {
            d2.borrow_mut().extend(batch.into_iter().map(|(_, v)| v));
        });
        cache.set("k".to_string(), 1);
        cache.set("k".to_string(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(disposed.borrow().as_slice(), &[1]);
        assert_eq!(cache.get(&"k".to_string()), Some(&2));
    }

    #[test]
    fn remove_returns_value_without_dispose() {
        let (mut cache, log) = counting_cache(4);
        cache.set("k".to_string(), 7);
        assert_eq!(cache.remove(&"k".to_string()), Some(7));
        assert_eq!(cache.remove(&"k".to_string()), None);
        assert!(log.borrow().is_empty());
    }
}
