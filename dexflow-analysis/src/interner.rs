//! Hash-consing interner with stable handles.
//!
//! Factories built on this live for the whole analysis: values are
//! interned once, never freed, and the returned handle compares and
//! hashes by pointer. Two handles are equal iff the interned values are
//! structurally equal, so every downstream map keyed on a handle gets
//! pointer-speed lookups.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Mutex;

use rustc_hash::FxHashMap;

const SHARD_COUNT: usize = 16;

/// A stable reference to an interned value.
///
/// `Copy`, pointer-equality, pointer-hashing. The pointee is leaked by
/// the owning [`Interner`] and outlives the analysis.
pub struct Interned<T: 'static>(&'static T);

impl<T> Interned<T> {
    /// The raw pointer identity, used for deterministic tie-breaking.
    pub fn as_ptr(self) -> *const T {
        self.0 as *const T
    }
}

impl<T> Clone for Interned<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Interned<T> {}

impl<T> Deref for Interned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.0
    }
}

impl<T> PartialEq for Interned<T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl<T> Eq for Interned<T> {}

impl<T> Hash for Interned<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.0, state);
    }
}

impl<T> PartialOrd for Interned<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Interned<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.0 as *const T).cmp(&(other.0 as *const T))
    }
}

impl<T: fmt::Debug> fmt::Debug for Interned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: fmt::Display> fmt::Display for Interned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A sharded hash-consing interner.
///
/// Inserts take a per-shard mutex; lookups of already-interned values
/// contend only within their shard. There is no removal.
pub struct Interner<T: 'static> {
    shards: Vec<Mutex<FxHashMap<&'static T, Interned<T>>>>,
}

impl<T: Eq + Hash> Interner<T> {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(FxHashMap::default()))
                .collect(),
        }
    }

    /// Intern a value, returning its stable handle.
    pub fn intern(&self, value: T) -> Interned<T> {
        let mut hasher = rustc_hash::FxHasher::default();
        value.hash(&mut hasher);
        let shard = (hasher.finish() as usize) % SHARD_COUNT;

        let mut map = self.shards[shard].lock().expect("interner lock poisoned");
        if let Some(&handle) = map.get(&value) {
            return handle;
        }
        let leaked: &'static T = Box::leak(Box::new(value));
        let handle = Interned(leaked);
        map.insert(leaked, handle);
        handle
    }

    /// Number of interned values across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().expect("interner lock poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Eq + Hash> Default for Interner<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let interner = Interner::new();
        let a = interner.intern("hello".to_string());
        let b = interner.intern("hello".to_string());
        let c = interner.intern("world".to_string());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn handles_deref_to_value() {
        let interner = Interner::new();
        let handle = interner.intern(42u64);
        assert_eq!(*handle, 42);
    }

    #[test]
    fn handles_are_stable_across_inserts() {
        let interner = Interner::new();
        let first = interner.intern(1u32);
        for i in 0..1000u32 {
            interner.intern(i);
        }
        assert_eq!(first, interner.intern(1u32));
    }
}
