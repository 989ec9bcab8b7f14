//! A single-slot, sequenced snapshot publisher.
//!
//! Mirrors the teacher's `Link<T>` single-slot design ("always returns the
//! LATEST value... producer overwrites, consumer tracks what it's already
//! read via sequence number") but in-process rather than over shared
//! memory: a `parking_lot::RwLock` guards `(sequence, value)` together so
//! readers never observe a sequence number paired with the wrong value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Publishes snapshots of type `T`, each tagged with a monotonically
/// non-decreasing sequence number. Sequence `0` means "nothing published
/// yet" (spec §4.B: "implementations may skip zero").
pub struct Publisher<T> {
    slot: RwLock<Option<(u64, Arc<T>)>>,
    next_sequence: AtomicU64,
}

impl<T> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Publisher<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Publish a new value, incrementing the sequence number.
    pub fn publish(&self, value: T) -> u64 {
        let seq = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        *self.slot.write() = Some((seq, Arc::new(value)));
        seq
    }

    /// Current `(sequence, value)`, or `None` if nothing has been
    /// published yet.
    pub fn current(&self) -> Option<(u64, Arc<T>)> {
        self.slot.read().clone()
    }

    /// Current sequence number, or `0` if nothing has been published.
    pub fn sequence(&self) -> u64 {
        self.slot.read().as_ref().map(|(s, _)| *s).unwrap_or(0)
    }
}
