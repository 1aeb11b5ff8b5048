//! Inline caches for `Call` instructions.
//!
//! ```text
//!  Uninitialized ──hit──▶ Monomorphic ──new type──▶ Polymorphic(≤ limit) ──▶ Megamorphic
//!        ▲                                                                      │
//!        └──────────────── any metaclass mutation (epoch change) ◀──────────────┘
//! ```
//!
//! Entries are keyed by receiver class identity, whether the receiver was
//! a class object, and the classes of the arguments. A site remembers the
//! registry epoch it was filled under; a different epoch empties it.
use parking_lot::Mutex;

use crate::meta::MetaMethod;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SiteKey {
    pub receiver: usize,
    pub is_static: bool,
    pub shape: Box<[usize]>,
}

#[derive(Debug, Clone)]
struct Entry {
    key: SiteKey,
    method: MetaMethod,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Uninitialized,
    Monomorphic(Entry),
    Polymorphic(Vec<Entry>),
    Megamorphic,
}

/// Observable cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteState {
    Uninitialized,
    Monomorphic,
    Polymorphic(usize),
    Megamorphic,
}

#[derive(Debug, Default)]
struct Inner {
    epoch: u64,
    state: State,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Default)]
pub struct CallSite {
    inner: Mutex<Inner>,
}

impl CallSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SiteState {
        match &self.inner.lock().state {
            State::Uninitialized => SiteState::Uninitialized,
            State::Monomorphic(_) => SiteState::Monomorphic,
            State::Polymorphic(entries) => SiteState::Polymorphic(entries.len()),
            State::Megamorphic => SiteState::Megamorphic,
        }
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.hits, inner.misses)
    }

    pub(crate) fn lookup(&self, epoch: u64, key: &SiteKey) -> Option<MetaMethod> {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            if !matches!(inner.state, State::Uninitialized) {
                log::trace!("call site invalidated (epoch {} -> {epoch})", inner.epoch);
            }
            inner.state = State::Uninitialized;
            inner.epoch = epoch;
        }
        let found = match &inner.state {
            State::Monomorphic(e) if e.key == *key => Some(e.method.clone()),
            State::Polymorphic(entries) => entries
                .iter()
                .find(|e| e.key == *key)
                .map(|e| e.method.clone()),
            _ => None,
        };
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    /// Remember a successful resolution.
    pub(crate) fn record(&self, epoch: u64, key: SiteKey, method: MetaMethod, limit: usize) {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            inner.state = State::Uninitialized;
            inner.epoch = epoch;
        }
        let entry = Entry { key, method };
        inner.state = match std::mem::take(&mut inner.state) {
            State::Uninitialized => State::Monomorphic(entry),
            State::Monomorphic(first) if first.key == entry.key => State::Monomorphic(entry),
            State::Monomorphic(first) => {
                if limit >= 2 {
                    State::Polymorphic(vec![first, entry])
                } else {
                    State::Megamorphic
                }
            }
            State::Polymorphic(mut entries) => {
                if let Some(existing) = entries.iter_mut().find(|e| e.key == entry.key) {
                    *existing = entry;
                    State::Polymorphic(entries)
                } else if entries.len() < limit {
                    entries.push(entry);
                    State::Polymorphic(entries)
                } else {
                    State::Megamorphic
                }
            }
            State::Megamorphic => State::Megamorphic,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::dummy_method;

    fn key(receiver: usize) -> SiteKey {
        SiteKey {
            receiver,
            is_static: false,
            shape: Box::new([]),
        }
    }

    #[test]
    fn state_machine() {
        let site = CallSite::new();
        assert_eq!(site.state(), SiteState::Uninitialized);
        assert!(site.lookup(0, &key(1)).is_none());
        site.record(0, key(1), dummy_method("a"), 3);
        assert_eq!(site.state(), SiteState::Monomorphic);
        assert!(site.lookup(0, &key(1)).is_some());
        site.record(0, key(2), dummy_method("a"), 3);
        assert_eq!(site.state(), SiteState::Polymorphic(2));
        site.record(0, key(3), dummy_method("a"), 3);
        assert_eq!(site.state(), SiteState::Polymorphic(3));
        site.record(0, key(4), dummy_method("a"), 3);
        assert_eq!(site.state(), SiteState::Megamorphic);
        assert!(site.lookup(0, &key(1)).is_none());
        assert_eq!(site.stats(), (1, 2));
    }

    #[test]
    fn epoch_change_empties_the_site() {
        let site = CallSite::new();
        site.record(0, key(1), dummy_method("a"), 4);
        assert!(site.lookup(0, &key(1)).is_some());
        assert!(site.lookup(1, &key(1)).is_none());
        assert_eq!(site.state(), SiteState::Uninitialized);
    }

    #[test]
    fn limit_of_one_skips_polymorphic() {
        let site = CallSite::new();
        site.record(0, key(1), dummy_method("a"), 1);
        site.record(0, key(2), dummy_method("a"), 1);
        assert_eq!(site.state(), SiteState::Megamorphic);
    }
}
