mod execute;
mod pool;
pub(crate) mod ready;

use crate::{
    config::ExecutorConfig,
    error::{ExecuteError, Result},
    executor::pool::ThreadPool,
    graph::TaskGraph,
    promise::RunFuture,
};
use core::num::NonZeroUsize;
use derive_more::Debug;
use std::io;

/// Runs [`TaskGraph`]s on a pool of worker threads.
///
/// `Worker` tasks run on the pool; `MainThread` tasks run on the thread that
/// called [`execute`](Self::execute) for the run, which drains them as they
/// become ready before `execute` returns. The pool must be started with
/// [`start`](Self::start) or [`run`](Self::run) before anything executes.
///
/// `A` is the argument type passed to every run and handed by reference to
/// [`TaskBody::CallWith`](crate::TaskBody::CallWith) bodies.
#[must_use]
#[derive(Debug)]
pub struct Executor<A = ()> {
    config: ExecutorConfig,
    pool: ThreadPool<A>,
}

impl<A: Send + Sync + 'static> Executor<A> {
    /// An idle executor with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    /// An idle executor with `config`.
    pub fn with_config(config: ExecutorConfig) -> Self {
        let pool = ThreadPool::new(config.queue_capacity);
        Self { config, pool }
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Spawn the configured number of worker threads.
    ///
    /// # Errors
    /// The OS error of a failed thread spawn.
    pub fn start(&self) -> io::Result<()> {
        self.run(self.config.worker_threads)
    }

    /// Spawn `thread_count` worker threads. Does nothing if the pool is
    /// already running.
    ///
    /// # Errors
    /// The OS error of a failed thread spawn.
    pub fn run(&self, thread_count: NonZeroUsize) -> io::Result<()> {
        self.pool.run(&self.config, thread_count)
    }

    /// Stop and join the worker threads.
    ///
    /// Runs whose tasks are still queued resolve with
    /// [`RunError::Stopped`](crate::RunError::Stopped). Calling it again, or
    /// on an idle executor, does nothing. The pool can be restarted.
    pub fn stop(&self) {
        self.pool.stop();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    /// Number of running worker threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }

    /// Start a run of `graph` over `args`.
    ///
    /// Returns once every `MainThread` task of the run has executed on the
    /// calling thread; `Worker` tasks may still be running. The returned
    /// future resolves when the whole run is complete.
    ///
    /// # Errors
    /// - [`ExecuteError::NotRunning`] if the pool is not running.
    /// - [`ExecuteError::RunInFlight`] if the previous run of `graph` has not
    ///   completed.
    /// - [`ExecuteError::Cycle`] if the graph could not be ordered.
    pub fn execute(
        &self,
        graph: &TaskGraph<A>,
        args: A,
    ) -> Result<RunFuture, ExecuteError> {
        if !self.pool.is_running() {
            return Err(ExecuteError::NotRunning);
        }
        let (plan, future) = graph.prepare(args)?;
        let workers = self.pool.ready();
        plan.start(workers);
        plan.drain_main_thread(workers);
        Ok(future)
    }

    /// [`execute`](Self::execute) and block until the run completes.
    ///
    /// # Errors
    /// Whatever prevented the run from starting or completing.
    pub fn execute_sync(&self, graph: &TaskGraph<A>, args: A) -> Result<()> {
        self.execute(graph, args)?.wait()?;
        Ok(())
    }
}

impl<A: Send + Sync + 'static> Default for Executor<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Drop for Executor<A> {
    fn drop(&mut self) {
        self.pool.stop();
    }
}
