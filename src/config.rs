use core::num::NonZeroUsize;
use std::{env, thread};
use tracing::warn;

/// Settings of an [`Executor`](crate::Executor) thread pool.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ExecutorConfig {
    /// Worker threads spawned by [`Executor::start`](crate::Executor::start).
    pub worker_threads: NonZeroUsize,
    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
    /// Stack size of worker threads; the platform default when `None`.
    pub stack_size: Option<usize>,
    /// Queue nodes allocated up front for the worker ready queue.
    pub queue_capacity: usize,
}

impl ExecutorConfig {
    /// Environment variable overriding [`worker_threads`](Self::worker_threads).
    pub const WORKERS_ENV: &str = "TASKGRAPH_WORKERS";

    /// The default configuration with `TASKGRAPH_WORKERS` applied if set.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = env::var(Self::WORKERS_ENV) {
            match value.trim().parse::<NonZeroUsize>() {
                Ok(workers) => config.worker_threads = workers,
                Err(err) => warn!(%value, %err, "ignoring invalid {}", Self::WORKERS_ENV),
            }
        }
        config
    }

    #[must_use]
    pub fn with_worker_threads(mut self, worker_threads: NonZeroUsize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    #[must_use]
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }
}

impl Default for ExecutorConfig {
    /// One worker per available core, leaving one for the calling thread.
    fn default() -> Self {
        let worker_threads = thread::available_parallelism()
            .ok()
            .and_then(|cores| NonZeroUsize::new(cores.get() - 1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            worker_threads,
            thread_name: "taskgraph-worker".to_owned(),
            stack_size: None,
            queue_capacity: 256,
        }
    }
}
