//! Observers track the last sequence number they have consumed from a
//! [`Publisher`] and cache the corresponding value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::publisher::Publisher;

pub struct Observer<T> {
    publisher: Arc<Publisher<T>>,
    last_seen: AtomicU64,
    cached: RwLock<Option<Arc<T>>>,
}

impl<T> Observer<T> {
    pub fn new(publisher: Arc<Publisher<T>>) -> Self {
        Self {
            publisher,
            last_seen: AtomicU64::new(0),
            cached: RwLock::new(None),
        }
    }

    /// Volatile read: would [`Self::update`] pick up a new value right now?
    pub fn is_update_needed(&self) -> bool {
        self.publisher.sequence() != self.last_seen.load(Ordering::Relaxed)
    }

    /// Read the current snapshot from the publisher, caching it. Returns
    /// `true` if the cached value changed as a result.
    pub fn update(&self) -> bool {
        match self.publisher.current() {
            Some((seq, value)) if seq != self.last_seen.load(Ordering::Relaxed) => {
                self.last_seen.store(seq, Ordering::Relaxed);
                *self.cached.write() = Some(value);
                true
            }
            _ => false,
        }
    }

    /// Last value observed via [`Self::update`], if any.
    pub fn latest(&self) -> Option<Arc<T>> {
        self.cached.read().clone()
    }

    pub fn last_seen_sequence(&self) -> u64 {
        self.last_seen.load(Ordering::Relaxed)
    }
}
