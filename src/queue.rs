use crate::{
    pool::{Node, NodeHandle, NodePool},
    sync::{AtomicIsize, Ordering, Retry},
    tagged::{AtomicTaggedPtr, TaggedPtr},
};
use core::{fmt, marker::PhantomData, ptr, ptr::NonNull};
use crossbeam_utils::CachePadded;
use std::sync::Arc;

/// A value that round-trips through a single `u64`.
///
/// Queue nodes store their payload in an atomic word, so a popper that loses
/// a race and reads a recycled node sees some other valid word instead of a
/// torn value. The losing read is thrown away without being unpacked.
///
/// # Safety
/// `unpack(pack(x))` must yield `x` back, and `unpack` is called at most once
/// per `pack`.
pub unsafe trait Packable: Sized {
    fn pack(self) -> u64;

    /// # Safety
    /// `word` must come from [`pack`](Packable::pack) and must not be
    /// unpacked twice.
    unsafe fn unpack(word: u64) -> Self;
}

// SAFETY: identity conversion.
unsafe impl Packable for u64 {
    fn pack(self) -> u64 {
        self
    }

    unsafe fn unpack(word: u64) -> Self {
        word
    }
}

// SAFETY: lossless widening and narrowing of the same value.
unsafe impl Packable for u32 {
    fn pack(self) -> u64 {
        u64::from(self)
    }

    unsafe fn unpack(word: u64) -> Self {
        word as u32
    }
}

// SAFETY: `usize` is at most 64 bits on every supported target.
unsafe impl Packable for usize {
    fn pack(self) -> u64 {
        self as u64
    }

    unsafe fn unpack(word: u64) -> Self {
        word as usize
    }
}

// SAFETY: the strong count travels with the word; `unpack` reclaims it.
unsafe impl<T> Packable for Arc<T> {
    fn pack(self) -> u64 {
        Arc::into_raw(self).expose_provenance() as u64
    }

    unsafe fn unpack(word: u64) -> Self {
        // SAFETY: `word` came from `Arc::into_raw` and is unpacked once.
        unsafe { Arc::from_raw(ptr::with_exposed_provenance(word as usize)) }
    }
}

/// A lock-free multi-producer multi-consumer queue (Michael–Scott).
///
/// `head` always points at a dummy node whose `next` is the first real
/// element. Both ends are [`TaggedPtr`]s and nodes are recycled through a
/// [`NodePool`], which together rule out the ABA hazard.
///
/// Ordering is FIFO per producer but only best-effort across producers.
pub struct LockFreeQueue<T: Packable> {
    head: CachePadded<AtomicTaggedPtr<Node>>,
    tail: CachePadded<AtomicTaggedPtr<Node>>,
    pool: NodePool,
    len: AtomicIsize,
    _marker: PhantomData<T>,
}

// SAFETY: values cross threads only by value, through push and pop.
unsafe impl<T: Packable + Send> Send for LockFreeQueue<T> {}
// SAFETY: see above; no `&T` is ever handed out.
unsafe impl<T: Packable + Send> Sync for LockFreeQueue<T> {}

impl<T: Packable> LockFreeQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_pool(NodePool::new())
    }

    /// A queue whose node pool is pre-filled with `capacity` nodes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_pool(NodePool::with_capacity(capacity))
    }

    fn with_pool(pool: NodePool) -> Self {
        let handle = pool.allocate();
        // A recycled node still links into the pool's free list.
        let link = &handle.node().next;
        link.store(link.load(Ordering::Relaxed).advance(ptr::null_mut()), Ordering::Relaxed);
        let dummy = handle.into_raw();
        let anchor = TaggedPtr::new(dummy.as_ptr(), 0);
        Self {
            head: CachePadded::new(AtomicTaggedPtr::new(anchor)),
            tail: CachePadded::new(AtomicTaggedPtr::new(anchor)),
            pool,
            len: AtomicIsize::new(0),
            _marker: PhantomData,
        }
    }

    /// Append `value`. Lock-free; helps a lagging tail along when it loses a
    /// race.
    pub fn push(&self, value: T) {
        let handle = self.pool.allocate();
        let node = handle.node();
        node.value.store(value.pack(), Ordering::Relaxed);
        let link = node.next.load(Ordering::Relaxed);
        node.next
            .store(link.advance(ptr::null_mut()), Ordering::Relaxed);
        let node = handle.into_raw();

        let retry = Retry::new();
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: nodes reachable from `tail` stay allocated while the
            // queue lives; a stale read is caught by the tag checks below.
            let tail_next = unsafe { &(*tail.pointer()).next };
            let next = tail_next.load(Ordering::Acquire);
            if tail != self.tail.load(Ordering::Acquire) {
                retry.wait();
                continue;
            }
            if next.is_null() {
                if tail_next
                    .compare_exchange_weak(
                        next,
                        next.advance(node.as_ptr()),
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    let _ = self.tail.compare_exchange(
                        tail,
                        tail.advance(node.as_ptr()),
                        Ordering::Release,
                        Ordering::Relaxed,
                    );
                    self.len.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            } else {
                // Somebody linked a node but has not swung the tail yet.
                let _ = self.tail.compare_exchange(
                    tail,
                    tail.advance(next.pointer()),
                    Ordering::Release,
                    Ordering::Relaxed,
                );
            }
            retry.wait();
        }
    }

    /// Remove a value, or return `None` if the queue was observed empty.
    pub fn pop(&self) -> Option<T> {
        let retry = Retry::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: see `push`.
            let next = unsafe { &(*head.pointer()).next }.load(Ordering::Acquire);
            if head != self.head.load(Ordering::Acquire) {
                retry.wait();
                continue;
            }
            if head.pointer() == tail.pointer() {
                if next.is_null() {
                    return None;
                }
                let _ = self.tail.compare_exchange(
                    tail,
                    tail.advance(next.pointer()),
                    Ordering::Release,
                    Ordering::Relaxed,
                );
            } else if let Some(first) = NonNull::new(next.pointer()) {
                // Read before the CAS: once `head` moves, `first` becomes the
                // dummy and may be recycled by another popper.
                // SAFETY: see `push`.
                let word = unsafe { first.as_ref() }.value.load(Ordering::Relaxed);
                if self
                    .head
                    .compare_exchange(
                        head,
                        head.advance(first.as_ptr()),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.len.fetch_sub(1, Ordering::Relaxed);
                    let dummy = NonNull::new(head.pointer()).expect("LockFreeQueue::pop: [1]");
                    // SAFETY: the successful CAS unlinked the old dummy, so this
                    // thread is now its only owner.
                    self.pool.free(unsafe { NodeHandle::from_raw(dummy) });
                    // SAFETY: the winning CAS grants the single unpack of this
                    // word.
                    return Some(unsafe { T::unpack(word) });
                }
            }
            retry.wait();
        }
    }

    /// Whether the queue holds no element right now.
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        // SAFETY: see `push`.
        unsafe { &(*head.pointer()).next }
            .load(Ordering::Acquire)
            .is_null()
    }

    /// Approximate number of queued elements.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).max(0) as usize
    }

    /// The node pool backing this queue.
    pub fn pool(&self) -> &NodePool {
        &self.pool
    }
}

impl<T: Packable> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Packable> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
        let dummy = NonNull::new(self.head.load(Ordering::Relaxed).pointer())
            .expect("LockFreeQueue::drop: [1]");
        // SAFETY: the queue is empty and exclusively borrowed; the dummy is
        // owned by nobody else.
        unsafe { self.pool.release(dummy) };
    }
}

impl<T: Packable> fmt::Debug for LockFreeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeQueue")
            .field("len", &self.len())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
