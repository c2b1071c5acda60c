use crate::{
    error::ExecuteError,
    graph::{Plan, PlanTask, ROOT, RunState, Structure},
    task::Affinity,
    types::HashMap,
    utils::BitSet,
};
use petgraph::{
    algo::toposort,
    graph::{DiGraph, NodeIndex},
};
use std::{collections::VecDeque, sync::Arc};
use tracing::debug;

impl<A> Structure<A> {
    /// Compile the part of the graph reachable from the root into a [`Plan`].
    ///
    /// Steps:
    /// 1. Collect the reachable subgraph breadth-first from the root.
    /// 2. Order it topologically; a cycle aborts compilation.
    /// 3. Drop every edge implied by a longer path (transitive reduction).
    /// 4. Build the plan tasks in reverse topological order so that each task
    ///    can hold its successors directly.
    pub(super) fn on_topology_change(&self) -> Result<Plan<A>, ExecuteError> {
        let mut dag = DiGraph::<u32, ()>::with_capacity(self.live + 1, self.live);
        let mut nodes: HashMap<u32, NodeIndex> = HashMap::default();
        nodes.insert(ROOT, dag.add_node(ROOT));
        let mut frontier = VecDeque::from([ROOT]);
        while let Some(index) = frontier.pop_front() {
            let from = nodes[&index];
            for &successor in &self.record(index).successors {
                let to = *nodes.entry(successor).or_insert_with(|| {
                    frontier.push_back(successor);
                    dag.add_node(successor)
                });
                dag.add_edge(from, to, ());
            }
        }

        let order = toposort(&dag, None).map_err(|cycle| ExecuteError::Cycle {
            task: self.record(dag[cycle.node_id()]).name.to_string(),
        })?;
        // Every task is reachable from the root, so the root comes first.
        assert_eq!(dag[order[0]], ROOT, "Structure::on_topology_change: [1]");

        let len = order.len();
        let mut position = vec![0; len];
        for (pos, node) in order.iter().enumerate() {
            position[node.index()] = pos;
        }

        let mut reach = vec![BitSet::with_len(len); len];
        let mut kept = vec![Vec::<usize>::new(); len];
        for pos in (0..len).rev() {
            let mut successors: Vec<usize> = dag
                .neighbors(order[pos])
                .map(|node| position[node.index()])
                .collect();
            // Nearest successors first: anything they reach is implied.
            successors.sort_unstable();
            let mut closure = BitSet::with_len(len);
            for successor in successors {
                if closure.contains(successor) {
                    continue;
                }
                kept[pos].push(successor);
                closure.insert(successor);
                closure.union_with(&reach[successor]);
            }
            reach[pos] = closure;
        }
        drop(reach);

        let mut dependency_totals = vec![0; len];
        for &successor in kept.iter().flatten() {
            dependency_totals[successor] += 1;
        }

        let main_thread_total = order[1..]
            .iter()
            .filter(|&&node| self.record(dag[node]).affinity == Affinity::MainThread)
            .count();
        let run = Arc::new(RunState::new(len - 1, main_thread_total));

        let mut built: Vec<Option<Arc<PlanTask<A>>>> = vec![None; len];
        let collect = |built: &[Option<Arc<PlanTask<A>>>], successors: &[usize]| {
            successors
                .iter()
                .map(|&pos| Arc::clone(built[pos].as_ref().expect("Structure::on_topology_change: [2]")))
                .collect::<Vec<_>>()
        };
        for pos in (1..len).rev() {
            let record = self.record(dag[order[pos]]);
            let successors = collect(&built, &kept[pos]);
            built[pos] = Some(Arc::new(PlanTask::new(
                record,
                successors,
                dependency_totals[pos],
                Arc::clone(&run),
            )));
        }
        let entry = collect(&built, &kept[0]);
        let tasks: Vec<_> = built.into_iter().skip(1).flatten().collect();

        debug!(
            tasks = tasks.len(),
            main_thread = main_thread_total,
            unreachable = self.live - tasks.len(),
            edges = dag.edge_count(),
            reduced_edges = kept.iter().map(Vec::len).sum::<usize>(),
            "task graph compiled"
        );
        Ok(Plan { entry, tasks, run })
    }
}
