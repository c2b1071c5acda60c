use crate::sync::{AtomicU64, Ordering};
use core::{fmt, marker::PhantomData, ptr};

const ADDR_BITS: u32 = 48;
const ADDR_MASK: u64 = (1 << ADDR_BITS) - 1;

/// A pointer and a 16-bit generation tag packed into one `u64`.
///
/// The low 48 bits hold the address and the high 16 bits hold the tag.
/// Two tagged pointers are equal only if both the address and the tag are
/// equal, which is what lets a compare-and-swap tell "same node" apart from
/// "same node, recycled since I last looked".
///
/// Tags wrap after 65536 generations.
#[repr(transparent)]
pub struct TaggedPtr<T> {
    raw: u64,
    _marker: PhantomData<*mut T>,
}

impl<T> TaggedPtr<T> {
    /// The null pointer with tag `0`.
    #[inline]
    #[must_use]
    pub const fn null() -> Self {
        Self::from_raw(0)
    }

    /// Pack `ptr` and `tag`.
    ///
    /// # Panics
    /// In debug builds, if the address does not fit in 48 bits.
    #[inline]
    #[must_use]
    pub fn new(ptr: *mut T, tag: u16) -> Self {
        let addr = ptr.expose_provenance() as u64;
        debug_assert_eq!(addr & !ADDR_MASK, 0, "TaggedPtr::new: address exceeds 48 bits");
        Self::from_raw((u64::from(tag) << ADDR_BITS) | (addr & ADDR_MASK))
    }

    #[inline]
    const fn from_raw(raw: u64) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// The address part.
    #[inline]
    #[must_use]
    pub fn pointer(self) -> *mut T {
        ptr::with_exposed_provenance_mut((self.raw & ADDR_MASK) as usize)
    }

    /// The current generation.
    #[inline]
    #[must_use]
    pub const fn tag(self) -> u16 {
        (self.raw >> ADDR_BITS) as u16
    }

    /// The generation a successful update of this word must carry.
    #[inline]
    #[must_use]
    pub const fn next_tag(self) -> u16 {
        self.tag().wrapping_add(1)
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.raw & ADDR_MASK == 0
    }

    /// `ptr` stamped with [`next_tag`](Self::next_tag).
    #[inline]
    #[must_use]
    pub fn advance(self, ptr: *mut T) -> Self {
        Self::new(ptr, self.next_tag())
    }

    #[inline]
    #[must_use]
    pub const fn into_raw(self) -> u64 {
        self.raw
    }
}

impl<T> Clone for TaggedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaggedPtr<T> {}

impl<T> PartialEq for TaggedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for TaggedPtr<T> {}

impl<T> fmt::Debug for TaggedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedPtr")
            .field("pointer", &self.pointer())
            .field("tag", &self.tag())
            .finish()
    }
}

/// An atomic cell holding a [`TaggedPtr`].
pub struct AtomicTaggedPtr<T> {
    raw: AtomicU64,
    _marker: PhantomData<*mut T>,
}

// SAFETY: the cell only stores an integer; dereferencing the pointer it
// yields is the caller's business.
unsafe impl<T> Send for AtomicTaggedPtr<T> {}
// SAFETY: see above.
unsafe impl<T> Sync for AtomicTaggedPtr<T> {}

impl<T> AtomicTaggedPtr<T> {
    pub fn new(value: TaggedPtr<T>) -> Self {
        Self {
            raw: AtomicU64::new(value.raw),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> TaggedPtr<T> {
        TaggedPtr::from_raw(self.raw.load(order))
    }

    #[inline]
    pub fn store(&self, value: TaggedPtr<T>, order: Ordering) {
        self.raw.store(value.raw, order);
    }

    /// Compare the whole word (address and tag) and swap on equality.
    ///
    /// # Errors
    /// Returns the value actually found if it differs from `current`.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: TaggedPtr<T>,
        new: TaggedPtr<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<TaggedPtr<T>, TaggedPtr<T>> {
        self.raw
            .compare_exchange(current.raw, new.raw, success, failure)
            .map(TaggedPtr::from_raw)
            .map_err(TaggedPtr::from_raw)
    }

    /// Like [`compare_exchange`](Self::compare_exchange) but may fail
    /// spuriously; meant for retry loops.
    ///
    /// # Errors
    /// Returns the value actually found on failure.
    #[inline]
    pub fn compare_exchange_weak(
        &self,
        current: TaggedPtr<T>,
        new: TaggedPtr<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<TaggedPtr<T>, TaggedPtr<T>> {
        self.raw
            .compare_exchange_weak(current.raw, new.raw, success, failure)
            .map(TaggedPtr::from_raw)
            .map_err(TaggedPtr::from_raw)
    }
}

impl<T> fmt::Debug for AtomicTaggedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicTaggedPtr")
            .field(&self.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn packs_pointer_and_tag() {
        let mut value = 7_u64;
        let ptr: *mut u64 = &mut value;
        let tagged = TaggedPtr::new(ptr, 0xBEEF);
        assert_eq!(tagged.pointer(), ptr);
        assert_eq!(tagged.tag(), 0xBEEF);
        assert!(!tagged.is_null());
        // SAFETY: `ptr` points at a live local.
        assert_eq!(unsafe { *tagged.pointer() }, 7);
    }

    #[test]
    fn equality_includes_the_tag() {
        let mut value = 0_u8;
        let ptr: *mut u8 = &mut value;
        let a = TaggedPtr::new(ptr, 1);
        let b = a.advance(ptr);
        assert_eq!(a.pointer(), b.pointer());
        assert_ne!(a, b);
        assert_eq!(b.tag(), 2);
    }

    #[test]
    fn tag_wraps_around() {
        let tagged = TaggedPtr::<u8>::new(ptr::null_mut(), u16::MAX);
        assert_eq!(tagged.next_tag(), 0);
        assert!(tagged.is_null());
        assert_ne!(tagged, TaggedPtr::null());
    }

    #[test]
    fn stale_compare_exchange_fails() {
        let mut value = 0_u32;
        let ptr: *mut u32 = &mut value;
        let cell = AtomicTaggedPtr::new(TaggedPtr::new(ptr, 0));
        let stale = cell.load(Ordering::Acquire);
        // Another "thread" swaps the pointer away and back again.
        cell.store(stale.advance(ptr::null_mut()), Ordering::Release);
        let reused = cell.load(Ordering::Acquire).advance(ptr);
        cell.store(reused, Ordering::Release);

        assert_eq!(cell.load(Ordering::Acquire).pointer(), stale.pointer());
        assert!(
            cell.compare_exchange(stale, TaggedPtr::null(), Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        );
    }
}
