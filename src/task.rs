use core::fmt;

/// Stable handle to a task slot.
///
/// A handle stays valid until its task is removed. Slots are reused, but each
/// reuse bumps the slot generation, so an old handle never aliases the new
/// occupant: every graph operation on a stale handle is a logged no-op.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle {
    index: u32,
    generation: u32,
}

impl TaskHandle {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot number inside the owning graph.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// How many times the slot had been recycled when this handle was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Which thread class may execute a task.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Affinity {
    /// Any pool worker.
    #[default]
    Worker,
    /// Only the thread that called [`Executor::execute`](crate::Executor::execute)
    /// for the run, e.g. for APIs that are not thread-safe.
    MainThread,
}

/// How [`TaskGraph::remove_task`](crate::TaskGraph::remove_task) treats the
/// successors of the removed task.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum RemoveMode {
    /// Remove the task and, transitively, every task that depends on it.
    #[default]
    Cascade,
    /// Remove only the task. Each direct successor loses one dependency and
    /// is re-attached to the root if it has none left.
    KeepSuccessors,
}

/// The work a task performs once per run.
///
/// `A` is the argument type handed to every run by
/// [`Executor::execute`](crate::Executor::execute).
pub enum TaskBody<A> {
    /// Does nothing; used by the root.
    Empty,
    /// A closure that ignores the run arguments.
    Call(Box<dyn FnMut() + Send>),
    /// A closure reading the run arguments.
    CallWith(Box<dyn FnMut(&A) + Send>),
}

impl<A> TaskBody<A> {
    pub fn call(f: impl FnMut() + Send + 'static) -> Self {
        Self::Call(Box::new(f))
    }

    pub fn call_with(f: impl FnMut(&A) + Send + 'static) -> Self {
        Self::CallWith(Box::new(f))
    }

    pub(crate) fn invoke(&mut self, args: &A) {
        match self {
            Self::Empty => {}
            Self::Call(f) => f(),
            Self::CallWith(f) => f(args),
        }
    }
}

impl<A> fmt::Debug for TaskBody<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "Empty",
            Self::Call(_) => "Call(..)",
            Self::CallWith(_) => "CallWith(..)",
        })
    }
}
