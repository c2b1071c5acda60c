use crate::{
    error::{ExecuteError, RunError},
    executor::ready::ReadyQueue,
    graph::PlanTask,
    promise::{self, Promise, RunFuture},
    sync::{AtomicBool, AtomicUsize, Ordering},
    types::SyncUnsafeCell,
};
use core::fmt;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Mutable state of one compiled plan across its runs.
///
/// At most one run of a plan is in flight. The run is armed by
/// [`begin`](Self::begin) and ends when the last task reports through
/// [`complete_one`](Self::complete_one), or when the thread pool aborts it.
pub(crate) struct RunState<A> {
    /// Tasks of the current run that have not completed.
    incomplete: CachePadded<AtomicUsize>,
    total: usize,
    pub(crate) main_thread_total: usize,
    in_flight: AtomicBool,
    /// Set once a run was aborted; the plan's counters are no longer usable.
    cancelled: AtomicBool,
    /// Set when a task body panicked; later bodies of the run are skipped.
    poisoned: AtomicBool,
    failure: Mutex<Option<RunError>>,
    promise: Mutex<Option<Promise>>,
    args: SyncUnsafeCell<Option<A>>,
    /// Ready tasks that must run on the thread executing the run.
    pub(crate) main_thread: ReadyQueue<Arc<PlanTask<A>>>,
}

impl<A> RunState<A> {
    pub(crate) fn new(total: usize, main_thread_total: usize) -> Self {
        Self {
            incomplete: CachePadded::new(AtomicUsize::new(total)),
            total,
            main_thread_total,
            in_flight: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
            failure: Mutex::new(None),
            promise: Mutex::new(None),
            args: SyncUnsafeCell::new(None),
            main_thread: ReadyQueue::with_capacity(main_thread_total),
        }
    }

    /// Arm the plan for a run over `args`.
    pub(crate) fn begin(&self, args: A) -> Result<RunFuture, ExecuteError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ExecuteError::RunInFlight);
        }
        // SAFETY: no task of this plan runs while `in_flight` was false.
        unsafe { *self.args.get() = Some(args) };
        self.poisoned.store(false, Ordering::Relaxed);
        *self.failure.lock() = None;
        self.incomplete.store(self.total, Ordering::Relaxed);

        let (promise, future) = promise::channel();
        *self.promise.lock() = Some(promise);
        debug!(tasks = self.total, "run started");
        if self.total == 0 {
            self.finish();
        }
        Ok(future)
    }

    /// Arguments of the current run.
    pub(crate) fn args(&self) -> &A {
        // SAFETY: written by `begin` before any task is dispatched and only
        // cleared by `finish` after the last task completed.
        unsafe { &*self.args.get() }
            .as_ref()
            .expect("RunState::args: [1]")
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Record a failed task. The first failure of a run is the one reported.
    pub(crate) fn poison(&self, failure: RunError) {
        let mut slot = self.failure.lock();
        if slot.is_none() {
            *slot = Some(failure);
        }
        self.poisoned.store(true, Ordering::Release);
    }

    /// Count one completed task, finishing the run after the last one.
    pub(crate) fn complete_one(&self) {
        if self.incomplete.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.incomplete.store(self.total, Ordering::Relaxed);
            self.finish();
        }
    }

    fn finish(&self) {
        let promise = self.promise.lock().take();
        let outcome = self.failure.lock().take().map_or(Ok(()), Err);
        // SAFETY: every task of the run has completed.
        unsafe { *self.args.get() = None };
        self.in_flight.store(false, Ordering::Release);
        debug!(ok = outcome.is_ok(), "run finished");
        if let Some(promise) = promise {
            promise.fulfill(outcome);
        }
        self.main_thread.notify_all();
    }

    /// Give up on the current run. The plan stays cancelled and is recompiled
    /// before its next run.
    pub(crate) fn abort(&self, error: RunError) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.main_thread.clear();
        let promise = self.promise.lock().take();
        self.in_flight.store(false, Ordering::Release);
        warn!(%error, "run aborted");
        if let Some(promise) = promise {
            promise.fulfill(Err(error));
        }
        self.main_thread.notify_all();
    }
}

impl<A> fmt::Debug for RunState<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunState")
            .field("incomplete", &self.incomplete.load(Ordering::Relaxed))
            .field("total", &self.total)
            .field("in_flight", &self.is_in_flight())
            .field("cancelled", &self.is_cancelled())
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}
