//! Bounded queue of captured-but-unsent profiles.
//!
//! Entries are keyed by [`CorrelationKey`] and evicted least-recently-used
//! first once the queue is full. Eviction drops the profile for good; callers
//! of [`CaptureQueue::take`] must expect `None`.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::{debug, trace};

use super::{CorrelationKey, RawProfile};

pub struct CaptureQueue {
    entries: Mutex<LruCache<CorrelationKey, RawProfile>>,
}

impl CaptureQueue {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Insert or refresh `key`.
    ///
    /// Returns the key that was evicted to make room, if any.
    pub fn put(&self, key: CorrelationKey, payload: RawProfile) -> Option<CorrelationKey> {
        let mut entries = self.entries.lock();
        match entries.push(key.clone(), payload) {
            Some((old_key, _)) if old_key != key => {
                debug!(evicted = %old_key, "Profile queue full, evicted oldest profile");
                Some(old_key)
            }
            Some(_) => {
                trace!(key = %key, "Replaced queued profile");
                None
            }
            None => {
                trace!(key = %key, queued = entries.len(), "Queued profile");
                None
            }
        }
    }

    /// Remove and return the profile for `key`.
    pub fn take(&self, key: &CorrelationKey) -> Option<RawProfile> {
        self.entries.lock().pop(key)
    }

    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.entries.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

impl std::fmt::Debug for CaptureQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("CaptureQueue")
            .field("len", &entries.len())
            .field("capacity", &entries.cap())
            .finish()
    }
}
