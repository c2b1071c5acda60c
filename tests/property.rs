#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use core::num::NonZeroUsize;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use taskgraph::{Affinity, Executor, ExecutorConfig, TaskBody, TaskGraph};

#[derive(Debug, Clone)]
struct DagShape {
    main_thread: Vec<bool>,
    /// `deps[i]` only names tasks before `i`, which keeps the graph acyclic.
    deps: Vec<Vec<usize>>,
}

fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = DagShape> {
    (1..=max_tasks).prop_flat_map(|len| {
        (
            proptest::collection::vec(any::<bool>(), len),
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), len),
        )
            .prop_map(|(main_thread, raw)| {
                let deps = raw
                    .into_iter()
                    .enumerate()
                    .map(|(i, candidates)| {
                        let mut deps: Vec<_> = candidates
                            .into_iter()
                            .filter(|_| i > 0)
                            .map(|candidate| candidate % i)
                            .collect();
                        deps.sort_unstable();
                        deps.dedup();
                        deps
                    })
                    .collect();
                DagShape { main_thread, deps }
            })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn random_dags_run_in_dependency_order(dag in dag_strategy(24), runs in 1..4usize) {
        let executor = Executor::with_config(
            ExecutorConfig::default().with_worker_threads(NonZeroUsize::new(3).unwrap()),
        );
        executor.start().unwrap();
        let graph = TaskGraph::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = dag
            .main_thread
            .iter()
            .enumerate()
            .map(|(i, &main)| {
                let log = Arc::clone(&log);
                let affinity = if main { Affinity::MainThread } else { Affinity::Worker };
                graph.add_task(format!("task-{i}"), affinity, TaskBody::call(move || log.lock().push(i)))
            })
            .collect();
        for (i, deps) in dag.deps.iter().enumerate() {
            for &dep in deps {
                prop_assert!(graph.link(handles[dep], handles[i]));
            }
        }

        for _ in 0..runs {
            executor.execute_sync(&graph, ()).unwrap();
            let order = std::mem::take(&mut *log.lock());
            prop_assert_eq!(order.len(), handles.len());

            let mut position = vec![usize::MAX; handles.len()];
            for (pos, &task) in order.iter().enumerate() {
                prop_assert_eq!(position[task], usize::MAX, "task {} ran twice", task);
                position[task] = pos;
            }
            for (i, deps) in dag.deps.iter().enumerate() {
                for &dep in deps {
                    prop_assert!(position[dep] < position[i], "task {} ran before its dependency {}", i, dep);
                }
            }
        }
    }

    #[test]
    fn removing_random_tasks_keeps_the_rest_runnable(dag in dag_strategy(16), victim in any::<prop::sample::Index>()) {
        let executor = Executor::with_config(
            ExecutorConfig::default().with_worker_threads(NonZeroUsize::new(2).unwrap()),
        );
        executor.start().unwrap();
        let graph = TaskGraph::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..dag.deps.len())
            .map(|i| {
                let log = Arc::clone(&log);
                graph.add_task(format!("task-{i}"), Affinity::Worker, TaskBody::call(move || log.lock().push(i)))
            })
            .collect();
        for (i, deps) in dag.deps.iter().enumerate() {
            for &dep in deps {
                graph.link(handles[dep], handles[i]);
            }
        }

        let victim = victim.index(handles.len());
        prop_assert_eq!(graph.remove_task(handles[victim], taskgraph::RemoveMode::KeepSuccessors), 1);
        prop_assert_eq!(graph.len(), handles.len() - 1);

        executor.execute_sync(&graph, ()).unwrap();
        let mut order = std::mem::take(&mut *log.lock());
        order.sort_unstable();
        let expected: Vec<_> = (0..handles.len()).filter(|&i| i != victim).collect();
        prop_assert_eq!(order, expected);
    }
}
