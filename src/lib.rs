//! Parallel task-graph executor with main-thread affinity.
//!
//! This crate runs a mutable DAG of tasks on a pool of worker threads. It:
//! - Keeps tasks in a slot map with generation-checked handles, linked to a
//!   synthetic root, so tasks and edges can be added or removed at any time.
//! - Recompiles the graph lazily before a run: reachability from the root,
//!   topological order with cycle detection, and a transitive reduction so
//!   every task waits only on the edges that matter.
//! - Schedules ready tasks through lock-free Michael–Scott queues whose nodes
//!   are recycled through an ABA-safe pool of tagged pointers.
//! - Runs `MainThread` tasks on the thread that started the run and resolves
//!   a [`RunFuture`] once the last task completed.
//!
//! Key modules:
//! - `graph`: [`TaskGraph`] and its structural operations.
//! - `executor`: [`Executor`], its thread pool, and the completion cascade.
//! - `queue`, `pool`, `tagged`: the lock-free building blocks.
//! - `promise`: the run completion signal.
//!
//! Quick start:
//! 1. Create an [`Executor`] and [`start`](Executor::start) its pool.
//! 2. Add tasks to a [`TaskGraph`] with [`TaskGraph::add_task`] and order them
//!    with [`TaskGraph::link`].
//! 3. Call [`Executor::execute`] and await or [`wait`](RunFuture::wait) on the
//!    returned future. The graph can be run again as soon as it resolves.

/// Thread pool settings.
pub mod config;
/// Error types of runs and run submission.
pub mod error;
/// The executor: thread pool, ready queues, and the completion cascade that
/// releases a task once all of its dependencies have run.
pub mod executor;
/// The task graph: slot map, edges, and lazy compilation into run plans.
pub mod graph;
/// `tracing-subscriber` setup for binaries and tests.
#[cfg(feature = "logging")]
pub mod logging;
/// Recycling pool of queue nodes.
pub mod pool;
/// Completion signal of a run.
pub mod promise;
/// Lock-free multi-producer multi-consumer queue.
pub mod queue;
mod sync;
/// Pointers packed with an ABA tag into one atomic word.
pub mod tagged;
/// Task handles, affinities, and bodies.
pub mod task;
mod types;
mod utils;

pub use crate::{
    config::ExecutorConfig,
    error::{Error, ExecuteError, Result, RunError},
    executor::Executor,
    graph::TaskGraph,
    pool::{NodeHandle, NodePool},
    promise::RunFuture,
    queue::{LockFreeQueue, Packable},
    tagged::{AtomicTaggedPtr, TaggedPtr},
    task::{Affinity, RemoveMode, TaskBody, TaskHandle},
};
