mod compile;
mod run;

pub(crate) use crate::graph::run::RunState;
use crate::{
    error::{ExecuteError, RunError},
    promise::RunFuture,
    sync::{AtomicUsize, Ordering},
    task::{Affinity, RemoveMode, TaskBody, TaskHandle},
    types::{FreeList, IndexSet, SyncUnsafeCell},
};
use core::fmt;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, warn};

/// Slot of the synthetic root task.
const ROOT: u32 = 0;

pub(crate) type TaskCell<A> = SyncUnsafeCell<TaskBody<A>>;

/// A mutable DAG of tasks that can be run repeatedly.
///
/// Every task added with [`add_task`](Self::add_task) depends on a synthetic
/// root, so the whole graph is reachable from one entry point. Structural
/// changes only mark the topology dirty; the graph is recompiled (reachability,
/// topological order, transitive reduction, dependency counters) lazily before
/// the next run.
///
/// All methods take `&self`: structural state sits behind one lock, and a run
/// works on an immutable compiled plan, so changing the graph while a run is in
/// flight affects only the next run.
pub struct TaskGraph<A = ()> {
    structure: Mutex<Structure<A>>,
}

struct Structure<A> {
    slots: Vec<Slot<A>>,
    free: FreeList,
    live: usize,
    dirty: bool,
    plan: Option<Arc<Plan<A>>>,
}

struct Slot<A> {
    generation: u32,
    task: Option<TaskRecord<A>>,
}

struct TaskRecord<A> {
    name: Arc<str>,
    affinity: Affinity,
    cell: Arc<TaskCell<A>>,
    /// Tasks that must complete before this one.
    dependents: IndexSet<u32>,
    /// Tasks waiting on this one.
    successors: IndexSet<u32>,
}

/// The reachable part of a graph, compiled for execution.
pub(crate) struct Plan<A> {
    /// Tasks the root leads to directly after reduction.
    pub(crate) entry: Vec<Arc<PlanTask<A>>>,
    /// Every reachable task in topological order.
    pub(crate) tasks: Vec<Arc<PlanTask<A>>>,
    pub(crate) run: Arc<RunState<A>>,
}

/// One task of a [`Plan`].
pub(crate) struct PlanTask<A> {
    pub(crate) name: Arc<str>,
    pub(crate) affinity: Affinity,
    pub(crate) cell: Arc<TaskCell<A>>,
    /// Successors left after transitive reduction.
    pub(crate) successors: Vec<Arc<PlanTask<A>>>,
    /// Number of reduced incoming edges, the root's included.
    pub(crate) dependency_total: usize,
    /// Dependencies not yet completed in the current run.
    pub(crate) pending: CachePadded<AtomicUsize>,
    pub(crate) run: Arc<RunState<A>>,
}

impl<A> TaskGraph<A> {
    /// An empty graph holding only the root.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// An empty graph with room for `capacity` tasks.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity + 1);
        slots.push(Slot {
            generation: 0,
            task: Some(TaskRecord::new(Arc::from("root"), Affinity::Worker, TaskBody::Empty)),
        });
        Self {
            structure: Mutex::new(Structure {
                slots,
                free: FreeList::new(),
                live: 0,
                dirty: true,
                plan: None,
            }),
        }
    }

    /// Handle of the synthetic root task.
    #[must_use]
    pub fn root(&self) -> TaskHandle {
        TaskHandle::new(ROOT, 0)
    }

    /// Add a task that depends on the root.
    pub fn add_task(
        &self,
        name: impl Into<String>,
        affinity: Affinity,
        body: TaskBody<A>,
    ) -> TaskHandle {
        self.insert(name.into(), affinity, body, true)
    }

    /// Add a task without linking it to the root.
    ///
    /// The task only runs once it is made reachable with [`link`](Self::link).
    pub fn add_detached_task(
        &self,
        name: impl Into<String>,
        affinity: Affinity,
        body: TaskBody<A>,
    ) -> TaskHandle {
        self.insert(name.into(), affinity, body, false)
    }

    fn insert(
        &self,
        name: String,
        affinity: Affinity,
        body: TaskBody<A>,
        link_to_root: bool,
    ) -> TaskHandle {
        let mut structure = self.structure.lock();
        let handle = structure.allocate(TaskRecord::new(Arc::from(name), affinity, body));
        if link_to_root {
            structure.connect(ROOT, handle.index());
        }
        structure.dirty = true;
        debug!(task = %handle, ?affinity, link_to_root, "task added");
        handle
    }

    /// Remove a task and return how many tasks were removed.
    ///
    /// Stale handles and the root are ignored.
    pub fn remove_task(&self, handle: TaskHandle, mode: RemoveMode) -> usize {
        let mut structure = self.structure.lock();
        let Some(index) = structure.resolve(handle) else {
            warn!(task = %handle, "remove_task: stale task handle");
            return 0;
        };
        if index == ROOT {
            warn!("remove_task: the root task cannot be removed");
            return 0;
        }

        let removed = match mode {
            RemoveMode::Cascade => {
                let mut doomed = IndexSet::default();
                let mut pending = VecDeque::from([index]);
                while let Some(current) = pending.pop_front() {
                    if doomed.insert(current) {
                        pending.extend(structure.record(current).successors.iter().copied());
                    }
                }
                for &current in &doomed {
                    structure.detach(current);
                }
                doomed.len()
            }
            RemoveMode::KeepSuccessors => {
                let successors = structure.record(index).successors.clone();
                structure.detach(index);
                for successor in successors {
                    if structure.record(successor).dependents.is_empty() {
                        structure.connect(ROOT, successor);
                    }
                }
                1
            }
        };
        structure.dirty = true;
        debug!(task = %handle, ?mode, removed, "task removed");
        removed
    }

    /// Make `after` depend on `before`.
    ///
    /// Returns whether a new edge was inserted. Stale handles, self edges,
    /// edges into the root, and edges that would close a cycle are refused
    /// with a warning.
    pub fn link(&self, before: TaskHandle, after: TaskHandle) -> bool {
        let mut structure = self.structure.lock();
        let (Some(from), Some(to)) = (structure.resolve(before), structure.resolve(after)) else {
            warn!(%before, %after, "link: stale task handle");
            return false;
        };
        if from == to || to == ROOT {
            warn!(%before, %after, "link: invalid edge");
            return false;
        }
        if structure.record(from).successors.contains(&to) {
            return false;
        }
        if structure.reaches(to, from) {
            warn!(%before, %after, "link: edge would close a cycle");
            return false;
        }
        structure.connect(from, to);
        structure.dirty = true;
        true
    }

    /// Remove the dependency of `after` on `before`.
    ///
    /// Returns whether an edge was removed. A task left without dependencies
    /// is re-attached to the root; cutting the root edge of a task that has no
    /// other dependency is refused.
    pub fn unlink(&self, before: TaskHandle, after: TaskHandle) -> bool {
        let mut structure = self.structure.lock();
        let (Some(from), Some(to)) = (structure.resolve(before), structure.resolve(after)) else {
            warn!(%before, %after, "unlink: stale task handle");
            return false;
        };
        let dependents = &structure.record(to).dependents;
        if !dependents.contains(&from) || (from == ROOT && dependents.len() == 1) {
            return false;
        }
        structure.disconnect(from, to);
        if structure.record(to).dependents.is_empty() {
            structure.connect(ROOT, to);
        }
        structure.dirty = true;
        true
    }

    /// Whether `handle` refers to a live task.
    #[must_use]
    pub fn contains(&self, handle: TaskHandle) -> bool {
        self.structure.lock().resolve(handle).is_some()
    }

    /// Number of tasks, the root excluded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.structure.lock().live
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks with the given affinity, the root excluded.
    #[must_use]
    pub fn task_count(&self, affinity: Affinity) -> usize {
        let structure = self.structure.lock();
        structure
            .slots
            .iter()
            .skip(1)
            .filter_map(|slot| slot.task.as_ref())
            .filter(|task| task.affinity == affinity)
            .count()
    }

    #[must_use]
    pub fn name(&self, handle: TaskHandle) -> Option<Arc<str>> {
        self.with_record(handle, |task| Arc::clone(&task.name))
    }

    #[must_use]
    pub fn affinity(&self, handle: TaskHandle) -> Option<Affinity> {
        self.with_record(handle, |task| task.affinity)
    }

    /// Number of tasks `handle` directly depends on, the root included.
    #[must_use]
    pub fn dependency_count(&self, handle: TaskHandle) -> Option<usize> {
        self.with_record(handle, |task| task.dependents.len())
    }

    /// Number of tasks directly depending on `handle`.
    #[must_use]
    pub fn successor_count(&self, handle: TaskHandle) -> Option<usize> {
        self.with_record(handle, |task| task.successors.len())
    }

    fn with_record<R>(&self, handle: TaskHandle, f: impl FnOnce(&TaskRecord<A>) -> R) -> Option<R> {
        let structure = self.structure.lock();
        let index = structure.resolve(handle)?;
        Some(f(structure.record(index)))
    }

    /// Start a run: recompile if the topology changed, then arm the plan's
    /// counters and completion signal for `args`.
    pub(crate) fn prepare(&self, args: A) -> Result<(Arc<Plan<A>>, RunFuture), ExecuteError> {
        let mut structure = self.structure.lock();
        if structure
            .plan
            .as_ref()
            .is_some_and(|plan| plan.run.is_in_flight())
        {
            return Err(ExecuteError::RunInFlight);
        }
        let stale = structure
            .plan
            .as_ref()
            .is_none_or(|plan| plan.run.is_cancelled());
        if structure.dirty || stale {
            let plan = structure.on_topology_change()?;
            structure.plan = Some(Arc::new(plan));
            structure.dirty = false;
        }
        let plan = Arc::clone(structure.plan.as_ref().expect("TaskGraph::prepare: [1]"));
        let future = plan.run.begin(args)?;
        Ok((plan, future))
    }
}

impl<A> Default for TaskGraph<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for TaskGraph<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let structure = self.structure.lock();
        f.debug_struct("TaskGraph")
            .field("tasks", &structure.live)
            .field("dirty", &structure.dirty)
            .finish_non_exhaustive()
    }
}

impl<A> TaskRecord<A> {
    fn new(name: Arc<str>, affinity: Affinity, body: TaskBody<A>) -> Self {
        Self {
            name,
            affinity,
            cell: Arc::new(TaskCell::new(body)),
            dependents: IndexSet::default(),
            successors: IndexSet::default(),
        }
    }
}

impl<A> Structure<A> {
    fn allocate(&mut self, record: TaskRecord<A>) -> TaskHandle {
        self.live += 1;
        if let Some(index) = self.free.pop_front() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.task.is_none(), "Structure::allocate: [1]");
            slot.task = Some(record);
            return TaskHandle::new(index, slot.generation);
        }
        let index = u32::try_from(self.slots.len()).expect("Structure::allocate: [2]");
        self.slots.push(Slot {
            generation: 0,
            task: Some(record),
        });
        TaskHandle::new(index, 0)
    }

    /// Slot index of `handle` if it still refers to a live task.
    fn resolve(&self, handle: TaskHandle) -> Option<u32> {
        let slot = self.slots.get(handle.index() as usize)?;
        (slot.generation == handle.generation() && slot.task.is_some()).then_some(handle.index())
    }

    fn record(&self, index: u32) -> &TaskRecord<A> {
        self.slots[index as usize]
            .task
            .as_ref()
            .expect("Structure::record: [1]")
    }

    fn record_mut(&mut self, index: u32) -> &mut TaskRecord<A> {
        self.slots[index as usize]
            .task
            .as_mut()
            .expect("Structure::record_mut: [1]")
    }

    fn connect(&mut self, before: u32, after: u32) {
        self.record_mut(before).successors.insert(after);
        self.record_mut(after).dependents.insert(before);
    }

    fn disconnect(&mut self, before: u32, after: u32) {
        self.record_mut(before).successors.swap_remove(&after);
        self.record_mut(after).dependents.swap_remove(&before);
    }

    /// Sever every edge of `index` and return its slot to the free list.
    fn detach(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        let task = slot.task.take().expect("Structure::detach: [1]");
        slot.generation = slot.generation.wrapping_add(1);
        for dependent in task.dependents {
            if let Some(record) = self.slots[dependent as usize].task.as_mut() {
                record.successors.swap_remove(&index);
            }
        }
        for successor in task.successors {
            if let Some(record) = self.slots[successor as usize].task.as_mut() {
                record.dependents.swap_remove(&index);
            }
        }
        self.free.push_back(index);
        self.live -= 1;
    }

    /// Whether `to` is reachable from `from` along successor edges.
    fn reaches(&self, from: u32, to: u32) -> bool {
        let mut visited = vec![false; self.slots.len()];
        let mut stack = vec![from];
        while let Some(index) = stack.pop() {
            if index == to {
                return true;
            }
            if !std::mem::replace(&mut visited[index as usize], true) {
                stack.extend(self.record(index).successors.iter().copied());
            }
        }
        false
    }
}

impl<A> PlanTask<A> {
    fn new(
        record: &TaskRecord<A>,
        successors: Vec<Arc<PlanTask<A>>>,
        dependency_total: usize,
        run: Arc<RunState<A>>,
    ) -> Self {
        Self {
            name: Arc::clone(&record.name),
            affinity: record.affinity,
            cell: Arc::clone(&record.cell),
            successors,
            dependency_total,
            pending: CachePadded::new(AtomicUsize::new(dependency_total)),
            run,
        }
    }

    /// Undo this task's dispatch when its run is abandoned.
    pub(crate) fn abort(&self, error: RunError) {
        self.run.abort(error);
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

impl<A> fmt::Debug for PlanTask<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanTask")
            .field("name", &self.name)
            .field("affinity", &self.affinity)
            .field("successors", &self.successors.len())
            .field("dependency_total", &self.dependency_total)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl<A> fmt::Debug for Plan<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("entry", &self.entry.len())
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}
