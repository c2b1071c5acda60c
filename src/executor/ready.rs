use crate::{
    queue::{LockFreeQueue, Packable},
    sync::{AtomicBool, Ordering},
};
use core::fmt;
use parking_lot::{Condvar, Mutex};

/// A [`LockFreeQueue`] that idle threads can sleep on.
///
/// Producers and consumers only touch the lock-free queue; the mutex is taken
/// to hand a wake-up to a sleeping consumer and by the consumer itself while it
/// re-checks the queue before sleeping, so no wake-up is lost.
///
/// A closed queue still accepts items, but [`push`](Self::push) reports that
/// nobody is left to pop them. The flag flips under the mutex, so an item
/// pushed before [`close`](Self::close) is visible to whoever drains the
/// queue afterwards.
pub(crate) struct ReadyQueue<T: Packable> {
    queue: LockFreeQueue<T>,
    lock: Mutex<()>,
    ready: Condvar,
    closed: AtomicBool,
}

impl<T: Packable> ReadyQueue<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: LockFreeQueue::with_capacity(capacity),
            lock: Mutex::new(()),
            ready: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue `value` and wake one sleeper. Returns `false` if the queue was
    /// closed; the caller then owns draining it.
    pub(crate) fn push(&self, value: T) -> bool {
        self.queue.push(value);
        let _guard = self.lock.lock();
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.ready.notify_one();
        true
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Sleep while the queue is empty and `keep_waiting` holds.
    ///
    /// Returns after a push, a [`notify_all`](Self::notify_all) or a spurious
    /// wake-up; callers loop.
    pub(crate) fn wait(&self, keep_waiting: impl Fn() -> bool) {
        let mut guard = self.lock.lock();
        if self.queue.is_empty() && keep_waiting() {
            self.ready.wait(&mut guard);
        }
    }

    /// Mark the queue closed and wake every sleeper.
    pub(crate) fn close(&self) {
        let _guard = self.lock.lock();
        self.closed.store(true, Ordering::Release);
        self.ready.notify_all();
    }

    pub(crate) fn reopen(&self) {
        let _guard = self.lock.lock();
        self.closed.store(false, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wake every sleeper so it re-checks its exit condition.
    pub(crate) fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.ready.notify_all();
    }

    /// Drop every queued item and return how many there were.
    pub(crate) fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.queue.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}

impl<T: Packable> fmt::Debug for ReadyQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyQueue")
            .field("len", &self.queue.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
