use crate::{
    error::RunError,
    executor::ready::ReadyQueue,
    graph::{Plan, PlanTask},
    sync::Ordering,
    task::Affinity,
};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{error, trace, warn};

pub(crate) type WorkerQueue<A> = ReadyQueue<Arc<PlanTask<A>>>;

impl<A> WorkerQueue<A> {
    /// Pop every queued task and abort its run. Returns how many were popped.
    pub(crate) fn abort_queued(&self, error: RunError) -> usize {
        let mut aborted = 0;
        while let Some(task) = self.pop() {
            task.abort(error.clone());
            aborted += 1;
        }
        aborted
    }
}

impl<A: Sync> PlanTask<A> {
    /// Execute the task body and propagate completion to its successors.
    pub(crate) fn execute(self: Arc<Self>, workers: &WorkerQueue<A>) {
        let Self {
            name,
            cell,
            successors,
            dependency_total,
            pending,
            run,
            ..
        } = &*self;
        if run.is_cancelled() {
            return;
        }
        // Every dependency has reported, so nothing touches the counter until
        // the next run.
        pending.store(*dependency_total, Ordering::Relaxed);

        if !run.is_poisoned() {
            // SAFETY: a task is dispatched once per run and a plan has at most
            // one run in flight, so this is the only reference to the body.
            let body = unsafe { &mut *cell.get() };
            let args = run.args();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| body.invoke(args))) {
                let message = panic_message(payload.as_ref());
                error!(task = %name, %message, "task panicked");
                run.poison(RunError::TaskPanicked {
                    task: name.to_string(),
                    message,
                });
            }
        }

        for successor in successors {
            if successor.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                successor.dispatch(workers);
            }
        }
        run.complete_one();
    }

    /// Queue the task on the ready queue matching its affinity.
    pub(crate) fn dispatch(self: &Arc<Self>, workers: &WorkerQueue<A>) {
        trace!(task = %self.name, affinity = ?self.affinity, "task ready");
        match self.affinity {
            Affinity::Worker => {
                if !workers.push(Arc::clone(self)) {
                    warn!(task = %self.name, "worker pool stopped under a running graph");
                    workers.abort_queued(RunError::Stopped);
                }
            }
            Affinity::MainThread => {
                // The per-run main-thread queue is never closed.
                self.run.main_thread.push(Arc::clone(self));
            }
        }
    }
}

impl<A: Sync> Plan<A> {
    /// Complete the root: release every task that only waited on it.
    pub(crate) fn start(&self, workers: &WorkerQueue<A>) {
        for task in &self.entry {
            if task.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                task.dispatch(workers);
            }
        }
    }

    /// Run the plan's main-thread tasks on the calling thread as they become
    /// ready. Returns once all of them ran or the run was aborted.
    pub(crate) fn drain_main_thread(&self, workers: &WorkerQueue<A>) {
        let run = &self.run;
        let mut remaining = run.main_thread_total;
        while remaining > 0 {
            if let Some(task) = run.main_thread.pop() {
                task.execute(workers);
                remaining -= 1;
                continue;
            }
            if run.is_cancelled() {
                break;
            }
            run.main_thread.wait(|| !run.is_cancelled());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
