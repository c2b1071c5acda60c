#![allow(missing_docs)]
#![cfg(feature = "loom")]

use loom::{
    sync::{Arc, Mutex},
    thread,
};
use taskgraph::{LockFreeQueue, NodePool};

#[test]
fn loom_queue_two_producers_one_consumer() {
    loom::model(|| {
        // Producers push 1, 2 and 10 while the consumer pops
        // concurrently. Whatever the interleaving, every value comes out
        // exactly once and each producer's values keep their order.
        let queue = Arc::new(LockFreeQueue::<u64>::new());

        let producers: Vec<_> = [vec![1, 2], vec![10]]
            .into_iter()
            .map(|values| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for value in values {
                        queue.push(value);
                    }
                })
            })
            .collect();

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        for producer in producers {
            producer.join().unwrap();
        }
        let mut popped: Vec<u64> = consumer.join().unwrap().into_iter().collect();
        while let Some(value) = queue.pop() {
            popped.push(value);
        }

        let small: Vec<_> = popped.iter().copied().filter(|&v| v < 10).collect();
        let large: Vec<_> = popped.iter().copied().filter(|&v| v >= 10).collect();
        assert_eq!(small, [1, 2]);
        assert_eq!(large, [10]);
        assert!(queue.is_empty());
    });
}

#[test]
fn loom_queue_concurrent_pops_never_duplicate() {
    loom::model(|| {
        // Two consumers race for two values: each value is taken once.
        let queue = Arc::new(LockFreeQueue::<u64>::new());
        queue.push(7);
        queue.push(8);

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.pop())
            })
            .collect();

        let mut popped: Vec<u64> = consumers
            .into_iter()
            .filter_map(|consumer| consumer.join().unwrap())
            .collect();
        popped.sort_unstable();
        assert_eq!(popped, [7, 8]);
        assert_eq!(queue.pop(), None);
    });
}

#[test]
fn loom_pool_allocations_never_alias() {
    loom::model(|| {
        // One node is pooled up front and the main thread keeps one handle
        // live throughout. Two threads allocate and free concurrently; every
        // address is registered while its handle is live, so a node handed
        // out twice shows up as a duplicate entry.
        let pool = Arc::new(NodePool::with_capacity(1));
        let live = Arc::new(Mutex::new(Vec::new()));
        let held = pool.allocate();
        live.lock().unwrap().push(held.addr());

        let threads: Vec<_> = (0..2)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let live = Arc::clone(&live);
                thread::spawn(move || {
                    let handle = pool.allocate();
                    let addr = handle.addr();
                    {
                        let mut live = live.lock().unwrap();
                        assert!(!live.contains(&addr), "node {addr:#x} handed out twice");
                        live.push(addr);
                    }
                    live.lock().unwrap().retain(|&other| other != addr);
                    pool.free(handle);
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(*live.lock().unwrap(), [held.addr()]);
        let again = pool.allocate();
        assert_ne!(again.addr(), held.addr());
        pool.free(held);
        pool.free(again);
        assert!(pool.allocated() <= 3);
    });
}
