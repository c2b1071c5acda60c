use crate::{config::ExecutorConfig, error::RunError, executor::execute::WorkerQueue};
use core::{fmt, num::NonZeroUsize};
use parking_lot::Mutex;
use std::{
    io, mem,
    sync::Arc,
    thread::{self, JoinHandle},
};
use tracing::{debug, error, info, warn};

/// Worker threads sharing one ready queue.
pub(crate) struct ThreadPool<A> {
    shared: Arc<Shared<A>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared<A> {
    /// Closed while the pool is stopped.
    ready: WorkerQueue<A>,
}

impl<A> ThreadPool<A> {
    pub(crate) fn new(queue_capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                ready: WorkerQueue::with_capacity(queue_capacity),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn ready(&self) -> &WorkerQueue<A> {
        &self.shared.ready
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.threads.lock().is_empty()
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Stop the pool: wake and join every worker, then abort the runs of the
    /// tasks still queued. Does nothing if the pool is not running.
    ///
    /// A task dispatched after this point finds the queue closed and aborts
    /// its own run.
    pub(crate) fn stop(&self) {
        let threads = mem::take(&mut *self.threads.lock());
        if threads.is_empty() {
            return;
        }
        self.shared.ready.close();

        let current = thread::current().id();
        for handle in threads {
            // A worker stopping its own pool exits once its task returns.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }

        let aborted = self.shared.ready.abort_queued(RunError::Stopped);
        info!(aborted, "thread pool stopped");
    }
}

impl<A: Send + Sync + 'static> ThreadPool<A> {
    /// Spawn `thread_count` workers.
    ///
    /// # Errors
    /// The spawn failure of a worker thread; workers spawned before it are
    /// stopped again.
    pub(crate) fn run(&self, config: &ExecutorConfig, thread_count: NonZeroUsize) -> io::Result<()> {
        let mut threads = self.threads.lock();
        if !threads.is_empty() {
            warn!(threads = threads.len(), "thread pool is already running");
            return Ok(());
        }
        self.shared.ready.reopen();

        for index in 0..thread_count.get() {
            let shared = Arc::clone(&self.shared);
            let mut builder = thread::Builder::new().name(format!("{}-{index}", config.thread_name));
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }
            match builder.spawn(move || shared.work(index)) {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    error!(%err, "failed to spawn worker thread");
                    drop(threads);
                    self.stop();
                    return Err(err);
                }
            }
        }
        info!(threads = thread_count.get(), "thread pool started");
        Ok(())
    }
}

impl<A: Send + Sync + 'static> Shared<A> {
    /// Worker loop: run ready tasks until the pool stops and the queue is
    /// drained.
    fn work(&self, index: usize) {
        debug!(worker = index, "worker started");
        loop {
            if let Some(task) = self.ready.pop() {
                task.execute(&self.ready);
                continue;
            }
            if self.ready.is_closed() {
                break;
            }
            self.ready.wait(|| !self.ready.is_closed());
        }
        debug!(worker = index, "worker stopped");
    }
}

impl<A> fmt::Debug for ThreadPool<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.thread_count())
            .field("ready", &self.shared.ready)
            .finish()
    }
}
