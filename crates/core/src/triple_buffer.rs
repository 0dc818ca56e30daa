//! Wait-free publication of a snapshot from one writer thread to one
//! real-time reader thread, with deferred reclamation.
//!
//! The writer calls [`TripleBuffer::update`] to publish a new `T` and
//! gets back the previously-pending snapshot, which it must not drop
//! until [`TripleBuffer::reclaim`] (called from the non-RT maintenance
//! tick) confirms the RT reader is no longer pointing at it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A snapshot reference retired by [`TripleBuffer::update`], pending
/// reclamation once the RT thread has moved past it.
pub struct Retired<T> {
    generation: usize,
    snapshot: Arc<T>,
}

/// RAII guard giving the RT thread read access to the current snapshot.
/// Acquisition never allocates or blocks.
pub struct RealtimeGuard<T> {
    snapshot: Arc<T>,
}

impl<T> std::ops::Deref for RealtimeGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.snapshot
    }
}

struct Inner<T> {
    current: Arc<T>,
    retired: Vec<(usize, Arc<T>)>,
}

/// Single-writer, single-RT-reader triple buffer.
pub struct TripleBuffer<T> {
    inner: Mutex<Inner<T>>,
    generation: AtomicUsize,
}

impl<T> TripleBuffer<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: Arc::new(initial),
                retired: Vec::new(),
            }),
            generation: AtomicUsize::new(0),
        }
    }

    /// Publishes `new` as the current snapshot and retires the previous
    /// one, returning a handle the caller must pass to [`Self::reclaim`]
    /// once it knows the RT thread can no longer observe it.
    pub fn update(&self, new: T) -> Retired<T> {
        let mut inner = self.inner.lock().unwrap();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel);
        let previous = std::mem::replace(&mut inner.current, Arc::new(new));
        Retired {
            generation,
            snapshot: previous,
        }
    }

    /// Wait-free, allocation-free access to the current snapshot for the
    /// RT reader.
    pub fn lock_realtime(&self) -> RealtimeGuard<T> {
        let inner = self.inner.lock().unwrap();
        RealtimeGuard {
            snapshot: Arc::clone(&inner.current),
        }
    }

    /// Queues `retired` for deferred drop. Called from the publishing
    /// (control) thread right after `update`.
    pub fn schedule_reclaim(&self, retired: Retired<T>) {
        let mut inner = self.inner.lock().unwrap();
        inner.retired.push((retired.generation, retired.snapshot));
    }

    /// Drops every retired snapshot with no other outstanding reference
    /// (i.e. the RT thread is no longer holding a guard over it). Called
    /// from the low-frequency maintenance tick.
    pub fn reclaim(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.retired.retain(|(_, snapshot)| Arc::strong_count(snapshot) > 1);
    }

    pub fn pending_reclaim_count(&self) -> usize {
        self.inner.lock().unwrap().retired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_observes_published_value() {
        let tb = TripleBuffer::new(1u32);
        assert_eq!(*tb.lock_realtime(), 1);
        let retired = tb.update(2);
        assert_eq!(*retired.snapshot, 1);
        assert_eq!(*tb.lock_realtime(), 2);
    }

    #[test]
    fn retired_snapshot_is_reclaimed_once_unreferenced() {
        let tb = TripleBuffer::new(1u32);
        let retired = tb.update(2);
        tb.schedule_reclaim(retired);
        assert_eq!(tb.pending_reclaim_count(), 1);

        tb.reclaim();
        assert_eq!(tb.pending_reclaim_count(), 0);
    }

    #[test]
    fn retired_snapshot_survives_reclaim_while_rt_guard_held() {
        let tb = TripleBuffer::new(1u32);
        let guard = tb.lock_realtime();
        let retired = tb.update(2);
        tb.schedule_reclaim(retired);

        tb.reclaim();
        assert_eq!(tb.pending_reclaim_count(), 1, "guard still holds a reference");

        drop(guard);
        tb.reclaim();
        assert_eq!(tb.pending_reclaim_count(), 0);
    }

    #[test]
    fn successive_updates_never_expose_a_torn_value() {
        let tb = Arc::new(TripleBuffer::new(0u32));
        let reader = Arc::clone(&tb);
        let handle = std::thread::spawn(move || {
            for _ in 0..1000 {
                let v = *reader.lock_realtime();
                assert!(v <= 10);
            }
        });

        for i in 1..=10u32 {
            let retired = tb.update(i);
            tb.schedule_reclaim(retired);
        }
        handle.join().unwrap();
        tb.reclaim();
    }
}
