use core::cell::UnsafeCell;
use derive_more::{Deref, DerefMut};
use indexmap::IndexSet as _IndexSet;
use rustc_hash::FxBuildHasher;
use std::collections::{HashMap as _HashMap, VecDeque};

/// A minimal `UnsafeCell` wrapper that is `Sync` when `T: Send`.
///
/// Used for task bodies and run arguments: the scheduling protocol hands a
/// slot to exactly one thread at a time (a task runs once per run, and a graph
/// has at most one run in flight), so no two threads touch it concurrently.
#[derive(Debug, Deref, DerefMut)]
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

// SAFETY: see the type-level comment; access is serialized by scheduling.
unsafe impl<T: Send> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }
}

pub(crate) type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
/// Edge sets keep insertion order so plans are built deterministically.
pub(crate) type IndexSet<T> = _IndexSet<T, FxBuildHasher>;
/// Slot indices waiting to be reused, oldest first.
pub(crate) type FreeList = VecDeque<u32>;
