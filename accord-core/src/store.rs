//! Keyed concurrent stores.
//!
//! Handlers load an entity, run a pure transition on it and write the result
//! back. [`Store::update`] makes that one atomic step per key: concurrent
//! updates of the same key are serialized, updates of different keys run in
//! parallel.
//!
//! The persistence format is the application's business; [`MemoryStore`] is
//! the in-process implementation the messenger uses by default.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

// ---------------------------------------------------------------------------
// Store contract (app may implement)
// ---------------------------------------------------------------------------

pub trait Store<K, V>: Send + Sync {
    fn load(&self, id: &K) -> Option<V>;

    fn store(&self, id: K, value: V);

    /// Visit every entry until `f` returns false.
    fn range(&self, f: &mut dyn FnMut(&K, &V) -> bool);

    /// Atomic read-modify-write of one key. `f` sees the current value and
    /// returns the value to write, or `None` to leave the entry untouched.
    /// Returns the entry as stored afterwards.
    fn update(&self, id: &K, f: &mut dyn FnMut(Option<&V>) -> Option<V>) -> Option<V>;
}

/// Run a one-shot transition under [`Store::update`] and hand back its
/// side result.
pub fn update_with<K, V, R>(
    store: &dyn Store<K, V>,
    id: &K,
    f: impl FnOnce(Option<&V>) -> (Option<V>, R),
) -> R {
    let mut f = Some(f);
    let mut out = None;
    store.update(id, &mut |current| {
        let step = f.take()?;
        let (next, result) = step(current);
        out = Some(result);
        next
    });
    match out {
        Some(result) => result,
        // `update` always calls back exactly once.
        None => unreachable!("store update did not run its transition"),
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

type Slot<V> = Arc<Mutex<Option<V>>>;

/// In-memory store with one lock per key.
///
/// The map-level lock is held only to find or insert a key's slot; the
/// transition itself runs under the slot's own mutex.
pub struct MemoryStore<K, V> {
    slots: RwLock<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        MemoryStore {
            slots: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys holding a value.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| lock(slot).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: &K) -> Slot<V> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id.clone()).or_default())
    }

    fn existing_slot(&self, id: &K) -> Option<Slot<V>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

fn lock<V>(slot: &Mutex<Option<V>>) -> MutexGuard<'_, Option<V>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> Store<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send,
{
    fn load(&self, id: &K) -> Option<V> {
        let slot = self.existing_slot(id)?;
        let guard = lock(&slot);
        guard.clone()
    }

    fn store(&self, id: K, value: V) {
        let slot = self.slot(&id);
        *lock(&slot) = Some(value);
    }

    fn range(&self, f: &mut dyn FnMut(&K, &V) -> bool) {
        let snapshot: Vec<(K, Slot<V>)> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();
        for (key, slot) in snapshot {
            let value = lock(&slot).clone();
            if let Some(value) = value {
                if !f(&key, &value) {
                    break;
                }
            }
        }
    }

    fn update(&self, id: &K, f: &mut dyn FnMut(Option<&V>) -> Option<V>) -> Option<V> {
        let slot = self.slot(id);
        let mut guard = lock(&slot);
        if let Some(next) = f(guard.as_ref()) {
            *guard = Some(next);
        }
        guard.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
