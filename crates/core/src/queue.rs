//! Typed single-producer/single-consumer queues built on the [`crate::fifo::Spsc`]
//! index discipline. This is the only FIFO shape used on the real-time
//! audio path: the packet hand-off and the too-late-sequence hand-off
//! both go through a [`SpscQueue`].

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use crate::fifo::Spsc;

/// A bounded SPSC queue of `T`. Producer and consumer may run on
/// different threads; `push`/`pop` never allocate and never block.
pub struct SpscQueue<T> {
    fifo: Spsc,
    storage: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: the `Spsc` discipline guarantees the producer's write segment
// and the consumer's read segment never overlap, so a single producer
// and a single consumer can hold `&SpscQueue<T>` concurrently and touch
// disjoint cells.
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let storage = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Self {
            fifo: Spsc::new(capacity),
            storage,
        }
    }

    pub fn len(&self) -> usize {
        self.fifo.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes `value`. Returns it back on failure (queue full).
    pub fn push(&self, value: T) -> Result<(), T> {
        let Some(lock) = self.fifo.prepare_for_write(1) else {
            return Err(value);
        };
        let position = lock.position();
        // SAFETY: `position.index1` is exclusively owned by this write
        // until `commit_write` runs; no reader can observe it yet.
        unsafe {
            (*self.storage[position.index1].get()).write(value);
        }
        self.fifo.commit_write(lock);
        Ok(())
    }

    /// Pops the oldest value, or `None` if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let lock = self.fifo.prepare_for_read(1)?;
        let position = lock.position();
        // SAFETY: `position.index1` was committed by a prior `push` and
        // is exclusively owned by this read until `commit_read` runs.
        let value = unsafe { (*self.storage[position.index1].get()).assume_init_read() };
        self.fifo.commit_read(lock);
        Some(value)
    }
}

impl<T> Drop for SpscQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trips_in_order() {
        let q = SpscQueue::<u32>::new(4);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_fails_when_full_and_returns_value() {
        let q = SpscQueue::<u32>::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.push(3), Err(3));
    }

    #[test]
    fn drop_releases_remaining_elements() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Debug)]
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(AtomicUsize::new(0));
        let q = SpscQueue::<Counted>::new(4);
        q.push(Counted(counter.clone())).unwrap();
        q.push(Counted(counter.clone())).unwrap();
        drop(q);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cross_thread_producer_consumer() {
        use std::sync::Arc;
        use std::thread;

        let q = Arc::new(SpscQueue::<u32>::new(16));
        let producer_q = Arc::clone(&q);
        let producer = thread::spawn(move || {
            for i in 0..1000u32 {
                loop {
                    if producer_q.push(i).is_ok() {
                        break;
                    }
                }
            }
        });

        let mut received = Vec::with_capacity(1000);
        while received.len() < 1000 {
            if let Some(v) = q.pop() {
                received.push(v);
            }
        }
        producer.join().unwrap();
        assert_eq!(received, (0..1000).collect::<Vec<_>>());
    }
}
