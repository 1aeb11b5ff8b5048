//! Shared parsing state.
//!
//! Every parse in the process interns its identifiers into one table so
//! later phases (and the runtime) can compare names by pointer.  The table
//! is derived state: it can be dropped at any time and rebuilt lazily.
//!
//! Parses hold the read lock for their whole duration.  Interning inside
//! the read lock is fine because the table itself is concurrent.  Clearing
//! takes the write lock, which briefly blocks new parses; it only happens
//! once the access counter crosses the configured threshold.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard};

use crate::ast::Name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Number of recorded accesses after which `maybe_evict` clears the
    /// tables. `0` disables eviction.
    pub eviction_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            eviction_threshold: 64,
        }
    }
}

/// The tables consulted during a parse.
#[derive(Debug)]
pub struct ParseTables {
    atoms: DashMap<Name, (), ahash::RandomState>,
}

impl Default for ParseTables {
    fn default() -> Self {
        Self::new()
    }
}

impl ParseTables {
    pub fn new() -> Self {
        Self {
            atoms: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Return the shared copy of `s`, inserting it on first use.
    pub fn intern(&self, s: &str) -> Name {
        // Fast path: check if already exists
        if let Some(entry) = self.atoms.get(s) {
            return entry.key().clone();
        }
        self.atoms.entry(Arc::from(s)).or_insert(()).key().clone()
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    fn clear(&self) {
        self.atoms.clear();
    }
}

#[derive(Debug)]
pub struct ParseCache {
    tables: RwLock<ParseTables>,
    accesses: AtomicUsize,
    evictions: AtomicUsize,
    config: CacheConfig,
}

impl Default for ParseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ParseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            tables: RwLock::new(ParseTables::new()),
            accesses: AtomicUsize::new(0),
            evictions: AtomicUsize::new(0),
            config,
        }
    }

    /// The process-wide cache used by [`crate::parse`].
    pub fn global() -> &'static ParseCache {
        static GLOBAL: OnceLock<ParseCache> = OnceLock::new();
        GLOBAL.get_or_init(ParseCache::default)
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Shared access to the tables for the duration of one parse.
    pub fn read(&self) -> RwLockReadGuard<'_, ParseTables> {
        self.tables.read()
    }

    /// Count one use of the tables. Returns the count so far.
    pub fn record_access(&self) -> usize {
        self.accesses.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Clear the tables if enough accesses have accumulated since the last
    /// clear. Returns whether a clear happened.
    ///
    /// Must not be called while the caller holds a read guard from
    /// [`read`](Self::read).
    pub fn maybe_evict(&self) -> bool {
        let threshold = self.config.eviction_threshold;
        if threshold == 0 || self.accesses.load(Ordering::Relaxed) < threshold {
            return false;
        }
        let tables = self.tables.write();
        // Another thread may have evicted while we waited for the lock.
        if self.accesses.load(Ordering::Relaxed) < threshold {
            return false;
        }
        let size = tables.len();
        tables.clear();
        self.accesses.store(0, Ordering::Relaxed);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        log::debug!("parse cache cleared ({size} atoms)");
        true
    }

    pub fn accesses(&self) -> usize {
        self.accesses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> usize {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn atom_count(&self) -> usize {
        self.tables.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn intern_returns_shared_pointer() {
        let tables = ParseTables::new();
        let a = tables.intern("foo");
        let b = tables.intern("foo");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(tables.len(), 1);
    }

    #[test]
    fn eviction_waits_for_threshold() {
        let cache = ParseCache::new(CacheConfig {
            eviction_threshold: 3,
        });
        cache.read().intern("x");
        cache.record_access();
        cache.record_access();
        assert!(!cache.maybe_evict());
        assert_eq!(cache.atom_count(), 1);

        cache.record_access();
        assert!(cache.maybe_evict());
        assert_eq!(cache.atom_count(), 0);
        assert_eq!(cache.accesses(), 0);
        assert_eq!(cache.evictions(), 1);
        assert!(!cache.maybe_evict());
    }

    #[test]
    fn zero_threshold_never_evicts() {
        let cache = ParseCache::new(CacheConfig {
            eviction_threshold: 0,
        });
        for _ in 0..100 {
            cache.record_access();
        }
        assert!(!cache.maybe_evict());
    }

    #[test]
    fn concurrent_readers_and_evictions() {
        let cache = Arc::new(ParseCache::new(CacheConfig {
            eviction_threshold: 5,
        }));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for j in 0..50 {
                        {
                            let tables = cache.read();
                            cache.record_access();
                            let name = format!("n{}", (i + j) % 7);
                            assert_eq!(&*tables.intern(&name), name.as_str());
                        }
                        cache.maybe_evict();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.evictions() > 0);
        assert!(cache.atom_count() <= 7);
    }
}
