use crossbeam_utils::Backoff;

#[cfg(feature = "loom")]
mod imp {
    use crossbeam_utils::Backoff;
    pub(crate) use loom::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, AtomicUsize, Ordering};

    /// Under loom a retry loop must hand control back to the model scheduler,
    /// otherwise a lost CAS race spins through the branch budget.
    #[inline]
    pub(crate) fn relax(_backoff: &Backoff) {
        loom::thread::yield_now();
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    use crossbeam_utils::Backoff;
    pub(crate) use core::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, AtomicUsize, Ordering};

    #[inline]
    pub(crate) fn relax(backoff: &Backoff) {
        backoff.spin();
    }
}

pub(crate) use imp::*;

/// Retry helper shared by the CAS loops of the node pool and the queue.
#[derive(Default)]
pub(crate) struct Retry(Backoff);

impl Retry {
    pub(crate) fn new() -> Self {
        Self(Backoff::new())
    }

    #[inline]
    pub(crate) fn wait(&self) {
        relax(&self.0);
    }
}
