use crate::{
    sync::{AtomicU64, AtomicUsize, Ordering, Retry},
    tagged::{AtomicTaggedPtr, TaggedPtr},
};
use core::{fmt, ptr::NonNull};
use crossbeam_utils::CachePadded;

/// A queue node: one payload word and a tagged link.
///
/// While a node sits in the pool, `next` links the free list; while it sits
/// in a queue, `next` links the queue.
pub(crate) struct Node {
    pub(crate) value: AtomicU64,
    pub(crate) next: AtomicTaggedPtr<Node>,
}

impl Node {
    fn boxed() -> NonNull<Node> {
        let node = Box::new(Node {
            value: AtomicU64::new(0),
            next: AtomicTaggedPtr::new(TaggedPtr::null()),
        });
        NonNull::from(Box::leak(node))
    }
}

/// Exclusive ownership of one node handed out by a [`NodePool`].
///
/// A handle is not `Clone`; giving it back with [`NodePool::free`] is the
/// only way to release it.
#[must_use]
pub struct NodeHandle(NonNull<Node>);

// SAFETY: a handle is the unique owner of its node and the node only holds
// atomics.
unsafe impl Send for NodeHandle {}

impl NodeHandle {
    /// Address of the node, for diagnostics and aliasing checks.
    pub fn addr(&self) -> usize {
        self.0.as_ptr().addr()
    }

    pub(crate) fn into_raw(self) -> NonNull<Node> {
        self.0
    }

    /// # Safety
    /// `node` must have come from [`NodeHandle::into_raw`] of a handle that
    /// was not returned to any pool since.
    pub(crate) unsafe fn from_raw(node: NonNull<Node>) -> Self {
        Self(node)
    }

    pub(crate) fn node(&self) -> &Node {
        // SAFETY: pooled nodes are only deallocated by `NodePool::clear`,
        // which requires `&mut NodePool` and so cannot run while this handle
        // is outstanding.
        unsafe { self.0.as_ref() }
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeHandle").field(&self.0).finish()
    }
}

/// A lock-free free list of queue nodes.
///
/// `allocate` and `free` are the pop and push of a Treiber stack whose head
/// is a [`TaggedPtr`]: every successful update bumps the tag, so a thread
/// that read the head, got preempted, and then races a pop-and-reuse cycle
/// of the same node fails its CAS instead of linking a stale `next`.
///
/// Nodes are only given back to the allocator by [`clear`](Self::clear) or on
/// drop, so a thread reading a node it lost the race for still reads valid
/// memory.
pub struct NodePool {
    free: CachePadded<AtomicTaggedPtr<Node>>,
    allocated: AtomicUsize,
    pooled: AtomicUsize,
}

impl NodePool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            free: CachePadded::new(AtomicTaggedPtr::new(TaggedPtr::null())),
            allocated: AtomicUsize::new(0),
            pooled: AtomicUsize::new(0),
        }
    }

    /// A pool pre-filled with `capacity` nodes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let pool = Self::new();
        for _ in 0..capacity {
            let node = Node::boxed();
            pool.allocated.fetch_add(1, Ordering::Relaxed);
            pool.free(NodeHandle(node));
        }
        pool
    }

    /// Pop a recycled node, or allocate a fresh one if the free list is
    /// empty. Never blocks.
    pub fn allocate(&self) -> NodeHandle {
        let retry = Retry::new();
        loop {
            let head = self.free.load(Ordering::Acquire);
            let Some(node) = NonNull::new(head.pointer()) else {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                return NodeHandle(Node::boxed());
            };
            // SAFETY: nodes stay allocated for the lifetime of the pool. If
            // another thread popped `node` meanwhile, `next` may be stale, but
            // then the head tag moved on and the CAS below fails.
            let next = unsafe { node.as_ref() }.next.load(Ordering::Acquire);
            if self
                .free
                .compare_exchange_weak(
                    head,
                    head.advance(next.pointer()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.pooled.fetch_sub(1, Ordering::Relaxed);
                return NodeHandle(node);
            }
            retry.wait();
        }
    }

    /// Push `handle` back onto the free list. Safe to call from any thread.
    pub fn free(&self, handle: NodeHandle) {
        let node = handle.into_raw();
        // SAFETY: the handle was the unique owner of `node`.
        let link = &unsafe { node.as_ref() }.next;
        let retry = Retry::new();
        self.pooled.fetch_add(1, Ordering::Relaxed);
        loop {
            let head = self.free.load(Ordering::Acquire);
            // Rewrite the link under a new tag before the node is published.
            let stale = link.load(Ordering::Relaxed);
            link.store(stale.advance(head.pointer()), Ordering::Relaxed);
            if self
                .free
                .compare_exchange_weak(
                    head,
                    head.advance(node.as_ptr()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return;
            }
            retry.wait();
        }
    }

    /// Deallocate every pooled node.
    ///
    /// Taking `&mut self` guarantees no other thread allocates or frees
    /// concurrently. Handles still outstanding are unaffected.
    pub fn clear(&mut self) {
        let mut cursor = self.free.load(Ordering::Acquire).pointer();
        self.free.store(TaggedPtr::null(), Ordering::Release);
        while let Some(node) = NonNull::new(cursor) {
            // SAFETY: every node on the free list came from `Node::boxed` and
            // is owned by the list alone.
            let node = unsafe { Box::from_raw(node.as_ptr()) };
            cursor = node.next.load(Ordering::Relaxed).pointer();
            drop(node);
            self.allocated.fetch_sub(1, Ordering::Relaxed);
            self.pooled.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Deallocate a node that is not on the free list.
    ///
    /// # Safety
    /// `node` must be uniquely owned by the caller and must have been
    /// allocated by this pool.
    pub(crate) unsafe fn release(&self, node: NonNull<Node>) {
        // SAFETY: upheld by the caller.
        drop(unsafe { Box::from_raw(node.as_ptr()) });
        self.allocated.fetch_sub(1, Ordering::Relaxed);
    }

    /// Number of nodes currently allocated from the heap, pooled or not.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Approximate length of the free list.
    pub fn pooled(&self) -> usize {
        self.pooled.load(Ordering::Relaxed)
    }
}

impl Default for NodePool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NodePool {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for NodePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePool")
            .field("allocated", &self.allocated())
            .field("pooled", &self.pooled())
            .finish_non_exhaustive()
    }
}
