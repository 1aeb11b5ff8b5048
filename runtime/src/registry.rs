//! The metaclass registry.
//!
//! One per [`Runtime`](crate::Runtime) unless a registry is shared on
//! purpose. Entries are keyed by class identity, so two classes with the
//! same name never share a metaclass. Metaclasses are built lazily on
//! first request and at most once per class: concurrent first requests
//! for the same class wait for a single build and share its result.
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::class::RuntimeClass;
use crate::meta::MetaClass;

type Slot = Arc<OnceLock<Arc<MetaClass>>>;

/// A class compared by address. Holding the `Arc` keeps the address from
/// being reused while the entry exists.
#[derive(Debug, Clone)]
struct ClassKey(Arc<RuntimeClass>);

impl PartialEq for ClassKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ClassKey {}

impl Hash for ClassKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

#[derive(Debug, Default)]
pub struct MetaClassRegistry {
    entries: DashMap<ClassKey, Slot, ahash::RandomState>,
    builds: AtomicUsize,
    /// Bumped by every metaclass mutation; call sites compare against it.
    epoch: AtomicU64,
}

impl MetaClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The metaclass of `class`, building it with `build` if there is
    /// none yet.
    pub fn get_or_build(&self, class: &Arc<RuntimeClass>, build: impl FnOnce() -> MetaClass) -> Arc<MetaClass> {
        // Release the shard guard before building so other classes stay
        // available while this one builds.
        let slot: Slot = Arc::clone(&*self.entries.entry(ClassKey(class.clone())).or_default());
        slot.get_or_init(|| {
            self.builds.fetch_add(1, Ordering::Relaxed);
            log::debug!("building metaclass {}", class.name());
            Arc::new(build())
        })
        .clone()
    }

    pub fn get(&self, class: &Arc<RuntimeClass>) -> Option<Arc<MetaClass>> {
        self.entries.get(&ClassKey(class.clone()))?.get().cloned()
    }

    /// Forget the metaclass of `class`, dropping its dynamic methods. The
    /// next request builds a fresh one.
    pub fn remove(&self, class: &Arc<RuntimeClass>) -> bool {
        let removed = self.entries.remove(&ClassKey(class.clone())).is_some();
        if removed {
            self.invalidate();
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.invalidate();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of metaclass builds so far.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Invalidate every call site cache. Returns the new epoch.
    pub fn invalidate(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::meta::Strategy;

    #[test]
    fn concurrent_first_requests_build_once() {
        let registry = MetaClassRegistry::new();
        let class = Arc::new(RuntimeClass::builtin("Object", None));
        let threads = 8;
        let barrier = Barrier::new(threads);
        let results: Vec<Arc<MetaClass>> = thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        registry.get_or_build(&class, || {
                            // widen the race window
                            thread::sleep(Duration::from_millis(20));
                            MetaClass::build(&class, &Strategy::DEFAULT_ORDER)
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(registry.build_count(), 1);
        assert!(results.iter().all(|m| Arc::ptr_eq(m, &results[0])));
    }

    #[test]
    fn remove_rebuilds_and_invalidates() {
        let registry = MetaClassRegistry::new();
        let class = Arc::new(RuntimeClass::builtin("Object", None));
        let first = registry.get_or_build(&class, || MetaClass::build(&class, &Strategy::DEFAULT_ORDER));
        let epoch = registry.epoch();
        assert!(registry.remove(&class));
        assert!(registry.epoch() > epoch);
        assert!(registry.get(&class).is_none());
        let second = registry.get_or_build(&class, || MetaClass::build(&class, &Strategy::DEFAULT_ORDER));
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.build_count(), 2);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn classes_with_the_same_name_keep_separate_metaclasses() {
        let registry = MetaClassRegistry::new();
        let one = Arc::new(RuntimeClass::builtin("A", None));
        let two = Arc::new(RuntimeClass::builtin("A", None));
        let first = registry.get_or_build(&one, || MetaClass::build(&one, &Strategy::DEFAULT_ORDER));
        let second = registry.get_or_build(&two, || MetaClass::build(&two, &Strategy::DEFAULT_ORDER));
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 2);
        assert!(registry.remove(&one));
        assert!(registry.get(&two).is_some());
    }
}
