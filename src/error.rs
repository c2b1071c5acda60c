use thiserror::Error;

/// Reasons a run could not be started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExecuteError {
    /// The reachable part of the graph is not acyclic.
    #[error("task graph contains a cycle through task `{task}`")]
    Cycle { task: String },
    /// The previous run of this graph has not completed yet.
    #[error("a run of this task graph is still in flight")]
    RunInFlight,
    /// The executor has no running worker threads.
    #[error("executor thread pool is not running")]
    NotRunning,
}

/// Reasons a started run resolved without completing normally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RunError {
    /// A task body panicked. Later bodies of the run were skipped.
    #[error("task `{task}` panicked: {message}")]
    TaskPanicked { task: String, message: String },
    /// The thread pool was stopped while the run still had queued tasks.
    #[error("thread pool stopped before the run completed")]
    Stopped,
    /// The completion signal was dropped without being fulfilled.
    #[error("run completion signal was abandoned")]
    Abandoned,
}

/// Any failure of [`Executor::execute_sync`](crate::Executor::execute_sync).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Execute(#[from] ExecuteError),
    #[error(transparent)]
    Run(#[from] RunError),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
