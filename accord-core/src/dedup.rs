use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use accord_protocol::ids::IdentityKey;

/// Replay cache entry: (sender, payload hash).
type CacheKey = (IdentityKey, [u8; 32]);

struct Inner {
    processed: LruCache<CacheKey, ()>,
    in_flight: HashSet<CacheKey>,
}

/// LRU cache of processed inbound payloads.
///
/// The state machines already drop stale updates, so a replay would be
/// harmless; the cache saves the decode and store round trip for the
/// redeliveries the transport produces. A payload is recorded only once its
/// handler succeeded. A copy arriving while the first is still being handled
/// waits for that outcome and takes over if it failed.
pub struct ReplayCache {
    inner: Mutex<Inner>,
    settled: Condvar,
}

impl ReplayCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ReplayCache {
            inner: Mutex::new(Inner {
                processed: LruCache::new(capacity),
                in_flight: HashSet::new(),
            }),
            settled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a payload for processing. Returns `None` if it was already
    /// processed successfully, blocking while another caller holds it.
    pub fn begin(&self, sender: &IdentityKey, payload: &[u8]) -> Option<ReplayClaim<'_>> {
        let key = (*sender, compute_payload_hash(payload));
        let mut inner = self.lock();
        loop {
            if inner.processed.contains(&key) {
                log::debug!("Duplicate payload from {} dropped", sender.short());
                return None;
            }
            if !inner.in_flight.contains(&key) {
                break;
            }
            inner = self
                .settled
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        inner.in_flight.insert(key);
        Some(ReplayClaim {
            cache: self,
            key,
            done: false,
        })
    }

    /// Returns true if the payload is NEW and records it as processed.
    pub fn check_and_insert(&self, sender: &IdentityKey, payload: &[u8]) -> bool {
        match self.begin(sender, payload) {
            Some(claim) => {
                claim.complete(true);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn settle(&self, key: &CacheKey, success: bool) {
        let mut inner = self.lock();
        inner.in_flight.remove(key);
        if success {
            inner.processed.put(*key, ());
            log::trace!("Replay check passed (cache size: {})", inner.processed.len());
        }
        drop(inner);
        self.settled.notify_all();
    }
}

/// Exclusive right to process one payload. Dropping it without
/// [`ReplayClaim::complete`] counts as a failure.
pub struct ReplayClaim<'a> {
    cache: &'a ReplayCache,
    key: CacheKey,
    done: bool,
}

impl ReplayClaim<'_> {
    pub fn complete(mut self, success: bool) {
        self.done = true;
        self.cache.settle(&self.key, success);
    }
}

impl Drop for ReplayClaim<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cache.settle(&self.key, false);
        }
    }
}

/// Compute BLAKE3 hash of inbound wire bytes.
pub fn compute_payload_hash(payload: &[u8]) -> [u8; 32] {
    *blake3::hash(payload).as_bytes()
}
