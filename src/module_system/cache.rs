//! C8 — a thread-safe LRU cache of loaded [`Module`]s (spec §3 "Cache",
//! §4.3, §5).
//!
//! Grounded on the teacher crate's `module_system::cache` (a
//! `ModuleId`-keyed table guarded by a single lock), generalized to the
//! spec's explicit LRU-by-`last_access_time` trim policy, the rule that
//! a module with `ref_count() > 0` is never evicted regardless of
//! recency, and hit/miss/eviction counters for `get_stats()`.

use crate::module_system::module::Module;
use crate::module_system::module_id::ModulePath;
use crate::module_system::platform::SharedLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hit/miss/eviction counters accumulated since the cache was created.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Successful `get` lookups.
    pub hits: u64,
    /// `get` lookups for a path not currently cached.
    pub misses: u64,
    /// Entries evicted by `trim` (not by explicit `remove`).
    pub evictions: u64,
}

/// A thread-safe cache of loaded modules, keyed by canonical path.
///
/// Reads (`get`) take a shared lock; only insertion, touch-on-access,
/// and eviction take the exclusive lock, so concurrent lookups from
/// multiple VM threads don't serialize on each other.
pub struct ModuleCache {
    inner: SharedLock<HashMap<ModulePath, Arc<Module>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ModuleCache {
    /// Creates a cache that trims down to `capacity` entries once it
    /// would otherwise exceed it.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: SharedLock::new(HashMap::new()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Looks up a module by path, touching its last-access time on hit.
    pub fn get(&self, path: &ModulePath) -> Option<Arc<Module>> {
        let guard = self.inner.read();
        let found = guard.get(path).cloned();
        if let Some(module) = &found {
            module.touch();
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// True if `path` is currently cached.
    pub fn contains(&self, path: &ModulePath) -> bool {
        self.inner.read().contains_key(path)
    }

    /// Inserts or replaces a module, then trims if over capacity.
    /// Alias for [`ModuleCache::insert`] matching the spec's `put` name.
    pub fn put(&self, module: Arc<Module>) {
        self.insert(module)
    }

    /// Inserts or replaces a module, then trims if over capacity.
    pub fn insert(&self, module: Arc<Module>) {
        {
            let mut guard = self.inner.write();
            guard.insert(module.path.clone(), module);
        }
        self.trim();
    }

    /// Removes a module unconditionally (used by explicit unload).
    pub fn remove(&self, path: &ModulePath) -> Option<Arc<Module>> {
        self.inner.write().remove(path)
    }

    /// Removes every cached module, including the bootstrap module.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Calls `callback` once per cached module, in unspecified order.
    pub fn iterate(&self, mut callback: impl FnMut(&Arc<Module>)) {
        for module in self.inner.read().values() {
            callback(module);
        }
    }

    /// Current number of cached modules.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True if the cache holds no modules.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cached paths, for introspection.
    pub fn paths(&self) -> Vec<ModulePath> {
        self.inner.read().keys().cloned().collect()
    }

    /// A snapshot of accumulated hit/miss/eviction counters.
    pub fn get_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Evicts least-recently-used, zero-ref-count entries until the
    /// cache is at or under capacity, or no more evictable entries
    /// remain.
    pub fn trim(&self) {
        self.trim_to(self.capacity)
    }

    /// Evicts least-recently-used, zero-ref-count entries until the
    /// cache holds at most `max_size` entries (spec §4.3 `trim`).
    pub fn trim_to(&self, max_size: usize) {
        let mut guard = self.inner.write();
        while guard.len() > max_size {
            let victim = guard
                .iter()
                .filter(|(_, m)| m.ref_count() == 0)
                .min_by_key(|(_, m)| *m.last_access_time.lock())
                .map(|(path, _)| path.clone());

            match victim {
                Some(path) => {
                    guard.remove(&path);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                // Every remaining entry is pinned (ref_count > 0); the
                // cache is allowed to exceed capacity in that case.
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(path: &str) -> Arc<Module> {
        Arc::new(Module::new(ModulePath::new(path)))
    }

    #[test]
    fn get_touches_last_access() {
        let cache = ModuleCache::new(10);
        let m = module("@cache-test-a");
        let before = *m.last_access_time.lock();
        cache.insert(m.clone());
        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.get(&ModulePath::new("@cache-test-a"));
        // last_access_time is second-granularity; just assert it never
        // regresses and the lookup succeeded.
        assert!(*m.last_access_time.lock() >= before);
    }

    #[test]
    fn trim_evicts_lru_unreferenced_entries() {
        let cache = ModuleCache::new(2);
        let a = module("@cache-trim-a");
        let b = module("@cache-trim-b");
        let c = module("@cache-trim-c");

        *a.last_access_time.lock() = 1;
        *b.last_access_time.lock() = 2;
        *c.last_access_time.lock() = 3;

        cache.insert(a);
        cache.insert(b);
        cache.insert(c);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&ModulePath::new("@cache-trim-a")));
        assert!(cache.contains(&ModulePath::new("@cache-trim-c")));
        assert_eq!(cache.get_stats().evictions, 1);
    }

    #[test]
    fn pinned_entries_survive_trim_over_capacity() {
        let cache = ModuleCache::new(1);
        let a = module("@cache-pin-a");
        let b = module("@cache-pin-b");
        a.retain();
        *a.last_access_time.lock() = 1;
        *b.last_access_time.lock() = 2;

        cache.insert(a);
        cache.insert(b);

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&ModulePath::new("@cache-pin-a")));
        assert!(cache.contains(&ModulePath::new("@cache-pin-b")));
    }

    #[test]
    fn remove_drops_entry_regardless_of_ref_count() {
        let cache = ModuleCache::new(10);
        let a = module("@cache-remove-a");
        a.retain();
        cache.insert(a);
        assert!(cache.remove(&ModulePath::new("@cache-remove-a")).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn get_stats_tracks_hits_and_misses() {
        let cache = ModuleCache::new(10);
        cache.insert(module("@cache-stats-a"));
        cache.get(&ModulePath::new("@cache-stats-a"));
        cache.get(&ModulePath::new("@cache-stats-missing"));
        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn iterate_visits_every_cached_module() {
        let cache = ModuleCache::new(10);
        cache.insert(module("@cache-iter-a"));
        cache.insert(module("@cache-iter-b"));
        let mut seen = Vec::new();
        cache.iterate(|m| seen.push(m.path.to_string()));
        seen.sort();
        assert_eq!(seen, vec!["@cache-iter-a".to_string(), "@cache-iter-b".to_string()]);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = ModuleCache::new(10);
        cache.insert(module("@cache-clear-a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn trim_to_honors_explicit_max_size() {
        let cache = ModuleCache::new(10);
        cache.insert(module("@cache-trimto-a"));
        cache.insert(module("@cache-trimto-b"));
        cache.insert(module("@cache-trimto-c"));
        cache.trim_to(1);
        assert_eq!(cache.len(), 1);
    }
}
