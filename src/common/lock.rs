use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;

/// The resource class a lock protects.
///
/// Scopes are ordered: `Database < Collection < Index`. When an operation
/// needs locks from more than one scope it must acquire them in scope order,
/// and within one scope in lexicographic name order, so that no two
/// operations ever wait on each other in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockScope {
    Database,
    Collection,
    Index,
}

/// A handle to one named reader/writer lock.
///
/// The handle is a cheap clone of the registry entry; guards borrow the
/// handle, so the handle must stay alive for the duration of the guard.
#[derive(Clone)]
pub struct LockHandle {
    lock: Arc<RwLock<()>>,
}

impl LockHandle {
    /// Acquires a shared read guard, blocking while a writer holds the lock.
    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    /// Acquires an exclusive write guard, blocking until all readers and
    /// writers release.
    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }
}

/// Process-global registry of named reader/writer locks.
///
/// Collection write operations take the collection's writer lock; reads take
/// the reader lock; index builds additionally take the index lock. Locks are
/// created on first request and live for the process lifetime. Guards are
/// RAII, so every exit path, including error propagation, releases them.
pub struct LockRegistry {
    locks: RwLock<HashMap<(LockScope, String), Arc<RwLock<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        LockRegistry {
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Gets (creating if absent) the lock for `(scope, name)`.
    pub fn get_lock(&self, scope: LockScope, name: &str) -> LockHandle {
        let lock = {
            let mut locks = self.locks.write();
            locks
                .entry((scope, name.to_string()))
                .or_insert_with(|| Arc::new(RwLock::new(())))
                .clone()
        };
        LockHandle { lock }
    }

    /// Removes a lock entry. Outstanding handles stay valid; only the
    /// registry entry is dropped.
    pub fn remove_lock(&self, scope: LockScope, name: &str) -> bool {
        let mut locks = self.locks.write();
        locks.remove(&(scope, name.to_string())).is_some()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.read().len()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn scope_ordering_matches_acquisition_discipline() {
        assert!(LockScope::Database < LockScope::Collection);
        assert!(LockScope::Collection < LockScope::Index);
    }

    #[test]
    fn same_name_different_scope_is_a_different_lock() {
        let registry = LockRegistry::new();
        let _a = registry.get_lock(LockScope::Database, "x");
        let _b = registry.get_lock(LockScope::Collection, "x");
        assert_eq!(registry.lock_count(), 2);
    }

    #[test]
    fn repeated_get_reuses_the_entry() {
        let registry = LockRegistry::new();
        let _a = registry.get_lock(LockScope::Collection, "users");
        let _b = registry.get_lock(LockScope::Collection, "users");
        assert_eq!(registry.lock_count(), 1);
    }

    #[test]
    fn concurrent_readers_share_the_lock() {
        let registry = Arc::new(LockRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut joins = vec![];
        for _ in 0..4 {
            let registry = registry.clone();
            let counter = counter.clone();
            joins.push(thread::spawn(move || {
                let handle = registry.get_lock(LockScope::Collection, "shared");
                let _guard = handle.read();
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for join in joins {
            join.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn writer_excludes_other_writers() {
        let registry = Arc::new(LockRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut joins = vec![];
        for _ in 0..2 {
            let registry = registry.clone();
            let counter = counter.clone();
            joins.push(thread::spawn(move || {
                let handle = registry.get_lock(LockScope::Collection, "serial");
                let _guard = handle.write();
                let seen = counter.load(Ordering::SeqCst);
                // no other writer can interleave between load and store
                counter.store(seen + 1, Ordering::SeqCst);
            }));
        }
        for join in joins {
            join.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn remove_lock_drops_entry() {
        let registry = LockRegistry::new();
        let _handle = registry.get_lock(LockScope::Index, "idx");
        assert!(registry.remove_lock(LockScope::Index, "idx"));
        assert!(!registry.remove_lock(LockScope::Index, "idx"));
        assert_eq!(registry.lock_count(), 0);
    }
}
