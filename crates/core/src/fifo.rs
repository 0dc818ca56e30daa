//! Lock-free (and lock-guarded) index bookkeeping for bounded queues.
//!
//! Five disciplines, selected by producer/consumer cardinality. All five
//! share the same `prepare_for_write`/`commit_write`/`prepare_for_read`/
//! `commit_read` contract: `prepare_*` computes a [`Position`] describing
//! up to two contiguous segments (the queue wraps at `capacity`), or
//! returns `None` ("a falsy lock") if the requested count doesn't fit.
//! The caller then copies into/out of those segments and calls the
//! matching `commit_*`, which is the only point that advances the
//! indices.
//!
//! Only [`Single`] and [`Spsc`] are safe to use on the real-time audio
//! path — [`Mpsc`], [`Spmc`], and [`Mpmc`] take locks on at least one
//! side and exist for control-side queues only.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// Describes how `n` queued elements split across the physical end of a
/// ring of the given capacity: `size1` elements starting at `index1`,
/// then `size2` more wrapped back to index 0 if the run didn't fit in
/// one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub index1: usize,
    pub size1: usize,
    pub size2: usize,
}

impl Position {
    fn compute(pointer: usize, capacity: usize, n: usize) -> Self {
        if pointer + n > capacity {
            let size1 = capacity - pointer;
            Position {
                index1: pointer,
                size1,
                size2: n - size1,
            }
        } else {
            Position {
                index1: pointer,
                size1: n,
                size2: 0,
            }
        }
    }

    pub fn total(&self) -> usize {
        self.size1 + self.size2
    }
}

/// Single producer, single consumer, same thread: plain indices, no
/// synchronization at all.
pub struct Single {
    head: Cell<usize>,
    tail: Cell<usize>,
    size: Cell<usize>,
    capacity: Cell<usize>,
}

pub struct SingleLock(Position);

impl SingleLock {
    pub fn position(&self) -> Position {
        self.0
    }
}

impl Single {
    pub fn new(capacity: usize) -> Self {
        Self {
            head: Cell::new(0),
            tail: Cell::new(0),
            size: Cell::new(0),
            capacity: Cell::new(capacity),
        }
    }

    pub fn prepare_for_write(&self, n: usize) -> Option<SingleLock> {
        if self.size.get() + n > self.capacity.get() {
            return None;
        }
        Some(SingleLock(Position::compute(self.tail.get(), self.capacity.get(), n)))
    }

    pub fn prepare_for_read(&self, n: usize) -> Option<SingleLock> {
        if self.size.get() < n {
            return None;
        }
        Some(SingleLock(Position::compute(self.head.get(), self.capacity.get(), n)))
    }

    pub fn commit_write(&self, lock: SingleLock) {
        let n = lock.0.total();
        self.tail.set((self.tail.get() + n) % self.capacity.get());
        self.size.set(self.size.get() + n);
    }

    pub fn commit_read(&self, lock: SingleLock) {
        let n = lock.0.total();
        self.head.set((self.head.get() + n) % self.capacity.get());
        self.size.set(self.size.get() - n);
    }

    pub fn size(&self) -> usize {
        self.size.get()
    }

    pub fn resize(&mut self, capacity: usize) {
        self.reset();
        self.capacity.set(capacity);
    }

    pub fn reset(&mut self) {
        self.head.set(0);
        self.tail.set(0);
        self.size.set(0);
    }
}

/// Single producer, single consumer, cross-thread: size is atomic, each
/// side owns its own index.
pub struct Spsc {
    head: AtomicUsize,
    tail: AtomicUsize,
    size: AtomicUsize,
    capacity: usize,
}

pub struct SpscLock(Position);

impl SpscLock {
    pub fn position(&self) -> Position {
        self.0
    }
}

impl Spsc {
    pub fn new(capacity: usize) -> Self {
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn prepare_for_write(&self, n: usize) -> Option<SpscLock> {
        if self.size.load(Ordering::Acquire) + n > self.capacity {
            return None;
        }
        Some(SpscLock(Position::compute(
            self.tail.load(Ordering::Relaxed),
            self.capacity,
            n,
        )))
    }

    pub fn prepare_for_read(&self, n: usize) -> Option<SpscLock> {
        if self.size.load(Ordering::Acquire) < n {
            return None;
        }
        Some(SpscLock(Position::compute(
            self.head.load(Ordering::Relaxed),
            self.capacity,
            n,
        )))
    }

    pub fn commit_write(&self, lock: SpscLock) {
        let n = lock.0.total();
        self.tail.store((self.tail.load(Ordering::Relaxed) + n) % self.capacity, Ordering::Relaxed);
        self.size.fetch_add(n, Ordering::Release);
    }

    pub fn commit_read(&self, lock: SpscLock) {
        let n = lock.0.total();
        self.head.store((self.head.load(Ordering::Relaxed) + n) % self.capacity, Ordering::Relaxed);
        self.size.fetch_sub(n, Ordering::Release);
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn resize(&mut self, capacity: usize) {
        self.reset();
        self.capacity = capacity;
    }

    pub fn reset(&mut self) {
        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
        *self.size.get_mut() = 0;
    }
}

/// Many producers, single consumer. Producers serialize through a
/// mutex guarding the tail index; the consumer reads `head` without
/// locking, on the documented assumption that `prepare_for_read` is
/// only ever called from one consumer thread (mirrors the original,
/// which calls `FifoMpsc::prepare_for_read` without taking the mutex).
pub struct Mpsc {
    producer: Mutex<usize>,
    head: AtomicUsize,
    size: AtomicUsize,
    capacity: usize,
}

pub struct MpscWriteLock<'a> {
    position: Position,
    _guard: MutexGuard<'a, usize>,
}

impl MpscWriteLock<'_> {
    pub fn position(&self) -> Position {
        self.position
    }
}

pub struct MpscReadLock(Position);

impl MpscReadLock {
    pub fn position(&self) -> Position {
        self.0
    }
}

impl Mpsc {
    pub fn new(capacity: usize) -> Self {
        Self {
            producer: Mutex::new(0),
            head: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn prepare_for_write(&self, n: usize) -> Option<MpscWriteLock<'_>> {
        let guard = self.producer.lock();
        if self.size.load(Ordering::Acquire) + n > self.capacity {
            return None;
        }
        let position = Position::compute(*guard, self.capacity, n);
        Some(MpscWriteLock { position, _guard: guard })
    }

    /// Single-consumer discipline: does not take the producer mutex.
    pub fn prepare_for_read(&self, n: usize) -> Option<MpscReadLock> {
        if self.size.load(Ordering::Acquire) < n {
            return None;
        }
        Some(MpscReadLock(Position::compute(
            self.head.load(Ordering::Relaxed),
            self.capacity,
            n,
        )))
    }

    pub fn commit_write(&self, mut lock: MpscWriteLock<'_>) {
        let n = lock.position.total();
        *lock._guard = (*lock._guard + n) % self.capacity;
        self.size.fetch_add(n, Ordering::Release);
    }

    pub fn commit_read(&self, lock: MpscReadLock) {
        let n = lock.0.total();
        self.head.store((self.head.load(Ordering::Relaxed) + n) % self.capacity, Ordering::Relaxed);
        self.size.fetch_sub(n, Ordering::Release);
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn resize(&mut self, capacity: usize) {
        self.reset();
        self.capacity = capacity;
    }

    pub fn reset(&mut self) {
        *self.producer.get_mut() = 0;
        *self.head.get_mut() = 0;
        *self.size.get_mut() = 0;
    }
}

/// Single producer, many consumers. Mirror image of [`Mpsc`]: the
/// consumer side is mutex-guarded, the producer is lock-free.
pub struct Spmc {
    tail: AtomicUsize,
    consumer: Mutex<usize>,
    size: AtomicUsize,
    capacity: usize,
}

pub struct SpmcWriteLock(Position);

impl SpmcWriteLock {
    pub fn position(&self) -> Position {
        self.0
    }
}

pub struct SpmcReadLock<'a> {
    position: Position,
    _guard: MutexGuard<'a, usize>,
}

impl SpmcReadLock<'_> {
    pub fn position(&self) -> Position {
        self.position
    }
}

impl Spmc {
    pub fn new(capacity: usize) -> Self {
        Self {
            tail: AtomicUsize::new(0),
            consumer: Mutex::new(0),
            size: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn prepare_for_write(&self, n: usize) -> Option<SpmcWriteLock> {
        if self.size.load(Ordering::Acquire) + n > self.capacity {
            return None;
        }
        Some(SpmcWriteLock(Position::compute(
            self.tail.load(Ordering::Relaxed),
            self.capacity,
            n,
        )))
    }

    pub fn prepare_for_read(&self, n: usize) -> Option<SpmcReadLock<'_>> {
        let guard = self.consumer.lock();
        if self.size.load(Ordering::Acquire) < n {
            return None;
        }
        let position = Position::compute(*guard, self.capacity, n);
        Some(SpmcReadLock { position, _guard: guard })
    }

    pub fn commit_write(&self, lock: SpmcWriteLock) {
        let n = lock.0.total();
        self.tail.store((self.tail.load(Ordering::Relaxed) + n) % self.capacity, Ordering::Relaxed);
        self.size.fetch_add(n, Ordering::Release);
    }

    pub fn commit_read(&self, mut lock: SpmcReadLock<'_>) {
        let n = lock.position.total();
        *lock._guard = (*lock._guard + n) % self.capacity;
        self.size.fetch_sub(n, Ordering::Release);
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn resize(&mut self, capacity: usize) {
        self.reset();
        self.capacity = capacity;
    }

    pub fn reset(&mut self) {
        *self.tail.get_mut() = 0;
        *self.consumer.get_mut() = 0;
        *self.size.get_mut() = 0;
    }
}

struct MpmcInner {
    head: usize,
    tail: usize,
    size: usize,
}

/// Many producers, many consumers: a single mutex serializes every
/// index and the size counter.
pub struct Mpmc {
    inner: Mutex<MpmcInner>,
    capacity: usize,
}

pub struct MpmcWriteLock<'a> {
    position: Position,
    _guard: MutexGuard<'a, MpmcInner>,
}

impl MpmcWriteLock<'_> {
    pub fn position(&self) -> Position {
        self.position
    }
}

pub struct MpmcReadLock<'a> {
    position: Position,
    _guard: MutexGuard<'a, MpmcInner>,
}

impl MpmcReadLock<'_> {
    pub fn position(&self) -> Position {
        self.position
    }
}

impl Mpmc {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MpmcInner { head: 0, tail: 0, size: 0 }),
            capacity,
        }
    }

    pub fn prepare_for_write(&self, n: usize) -> Option<MpmcWriteLock<'_>> {
        let guard = self.inner.lock();
        if guard.size + n > self.capacity {
            return None;
        }
        let position = Position::compute(guard.tail, self.capacity, n);
        Some(MpmcWriteLock { position, _guard: guard })
    }

    pub fn prepare_for_read(&self, n: usize) -> Option<MpmcReadLock<'_>> {
        let guard = self.inner.lock();
        if guard.size < n {
            return None;
        }
        let position = Position::compute(guard.head, self.capacity, n);
        Some(MpmcReadLock { position, _guard: guard })
    }

    pub fn commit_write(&self, mut lock: MpmcWriteLock<'_>) {
        let n = lock.position.total();
        lock._guard.tail = (lock._guard.tail + n) % self.capacity;
        lock._guard.size += n;
    }

    pub fn commit_read(&self, mut lock: MpmcReadLock<'_>) {
        let n = lock.position.total();
        lock._guard.head = (lock._guard.head + n) % self.capacity;
        lock._guard.size -= n;
    }

    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    pub fn resize(&mut self, capacity: usize) {
        self.reset();
        self.capacity = capacity;
    }

    pub fn reset(&mut self) {
        let mut guard = self.inner.lock();
        guard.head = 0;
        guard.tail = 0;
        guard.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_write_then_read_accounts_for_size() {
        let fifo = Single::new(4);
        let w = fifo.prepare_for_write(3).unwrap();
        fifo.commit_write(w);
        assert_eq!(fifo.size(), 3);

        let r = fifo.prepare_for_read(2).unwrap();
        fifo.commit_read(r);
        assert_eq!(fifo.size(), 1);
    }

    #[test]
    fn single_prepare_for_write_over_capacity_is_falsy() {
        let fifo = Single::new(4);
        assert!(fifo.prepare_for_write(5).is_none());
        assert_eq!(fifo.size(), 0);
    }

    #[test]
    fn single_position_wraps_across_physical_end() {
        let fifo = Single::new(4);
        fifo.commit_write(fifo.prepare_for_write(4).unwrap());
        fifo.commit_read(fifo.prepare_for_read(3).unwrap());
        // tail is now 0, head is 3; writing 2 more must wrap.
        let lock = fifo.prepare_for_write(2).unwrap();
        let pos = lock.position();
        assert_eq!(pos.index1, 0);
        assert_eq!(pos.total(), 2);
        fifo.commit_write(lock);
        assert_eq!(fifo.size(), 3);
    }

    #[test]
    fn spsc_write_read_matches_size_invariant() {
        let fifo = Spsc::new(8);
        for _ in 0..3 {
            fifo.commit_write(fifo.prepare_for_write(2).unwrap());
        }
        assert_eq!(fifo.size(), 6);
        fifo.commit_read(fifo.prepare_for_read(4).unwrap());
        assert_eq!(fifo.size(), 2);
    }

    #[test]
    fn spsc_prepare_for_write_over_capacity_is_falsy_and_no_state_change() {
        let fifo = Spsc::new(4);
        fifo.commit_write(fifo.prepare_for_write(4).unwrap());
        assert!(fifo.prepare_for_write(1).is_none());
        assert_eq!(fifo.size(), 4);
    }

    #[test]
    fn mpsc_many_producers_serialize_through_mutex() {
        use std::sync::Arc;
        use std::thread;

        let fifo = Arc::new(Mpsc::new(1000));
        let mut handles = vec![];
        for _ in 0..8 {
            let fifo = Arc::clone(&fifo);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    if let Some(lock) = fifo.prepare_for_write(1) {
                        fifo.commit_write(lock);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(fifo.size(), 800);

        fifo.commit_read(fifo.prepare_for_read(800).unwrap());
        assert_eq!(fifo.size(), 0);
    }

    #[test]
    fn spmc_many_consumers_serialize_through_mutex() {
        use std::sync::Arc;
        use std::thread;

        let fifo = Arc::new(Spmc::new(1000));
        fifo.commit_write(fifo.prepare_for_write(800).unwrap());

        let mut handles = vec![];
        for _ in 0..8 {
            let fifo = Arc::clone(&fifo);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    if let Some(lock) = fifo.prepare_for_read(1) {
                        fifo.commit_read(lock);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(fifo.size(), 0);
    }

    #[test]
    fn mpmc_size_equals_writes_minus_reads() {
        let fifo = Mpmc::new(16);
        fifo.commit_write(fifo.prepare_for_write(10).unwrap());
        fifo.commit_read(fifo.prepare_for_read(4).unwrap());
        assert_eq!(fifo.size(), 6);
        assert!(fifo.prepare_for_write(11).is_none());
    }

    #[test]
    fn resize_discards_content() {
        let mut fifo = Spsc::new(4);
        fifo.commit_write(fifo.prepare_for_write(4).unwrap());
        fifo.resize(8);
        assert_eq!(fifo.size(), 0);
        fifo.commit_write(fifo.prepare_for_write(8).unwrap());
        assert_eq!(fifo.size(), 8);
    }
}
