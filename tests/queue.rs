#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};
use taskgraph::{LockFreeQueue, NodePool};

const THREADS: u64 = 4;
const PER_THREAD: u64 = 20_000;

#[test]
fn single_thread_fifo() {
    let queue = LockFreeQueue::<u32>::new();
    assert!(queue.is_empty());
    assert_eq!(queue.pop(), None);

    for value in 0..100 {
        queue.push(value);
    }
    assert_eq!(queue.len(), 100);
    let popped: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
    assert_eq!(popped, (0..100).collect::<Vec<_>>());
    assert!(queue.is_empty());
}

#[test]
fn popped_nodes_are_recycled() {
    let queue = LockFreeQueue::<u64>::with_capacity(8);
    let allocated = queue.pool().allocated();
    for round in 0..1_000 {
        queue.push(round);
        assert_eq!(queue.pop(), Some(round));
    }
    // One push consumes one node and one pop recycles one: nothing new is
    // needed in steady state.
    assert_eq!(queue.pool().allocated(), allocated);
}

#[test]
fn dropping_a_queue_drops_its_values() {
    let value = Arc::new(());
    {
        let queue = LockFreeQueue::new();
        for _ in 0..10 {
            queue.push(Arc::clone(&value));
        }
        assert_eq!(Arc::strong_count(&value), 11);
    }
    assert_eq!(Arc::strong_count(&value), 1);
}

#[test]
fn concurrent_push_pop_preserves_the_multiset() {
    // 4 producers and 4 consumers. Every pushed value is popped exactly
    // once, and each producer's values come out in push order.
    let queue = Arc::new(LockFreeQueue::<u64>::new());
    let done = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(2 * THREADS as usize));

    let producers: Vec<_> = (0..THREADS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for seq in 0..PER_THREAD {
                    queue.push(producer << 32 | seq);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..THREADS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut popped = Vec::new();
                let mut last = vec![None; THREADS as usize];
                loop {
                    match queue.pop() {
                        Some(value) => {
                            let (producer, seq) = ((value >> 32) as usize, value & 0xFFFF_FFFF);
                            assert!(last[producer].is_none_or(|prev| prev < seq));
                            last[producer] = Some(seq);
                            popped.push(value);
                        }
                        None if done.load(Ordering::Acquire) => break,
                        None => thread::yield_now(),
                    }
                }
                popped
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    done.store(true, Ordering::Release);

    let mut seen = HashSet::new();
    for consumer in consumers {
        for value in consumer.join().unwrap() {
            assert!(seen.insert(value), "value {value:#x} popped twice");
        }
    }
    while let Some(value) = queue.pop() {
        assert!(seen.insert(value), "value {value:#x} popped twice");
    }
    assert_eq!(seen.len() as u64, THREADS * PER_THREAD);
}

#[test]
fn concurrent_pool_allocations_never_alias() {
    let pool = Arc::new(NodePool::with_capacity(16));
    let live = Arc::new(Mutex::new(HashSet::new()));

    let threads: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let live = Arc::clone(&live);
            thread::spawn(move || {
                for _ in 0..5_000 {
                    let handles: Vec<_> = (0..4).map(|_| pool.allocate()).collect();
                    for handle in &handles {
                        assert!(live.lock().insert(handle.addr()), "node handed out twice");
                    }
                    for handle in handles {
                        assert!(live.lock().remove(&handle.addr()));
                        pool.free(handle);
                    }
                }
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }
    assert!(live.lock().is_empty());
    assert!(pool.allocated() <= 16 + 4 * THREADS as usize);
}

#[test]
fn prefilled_queue_starts_empty() {
    let queue = LockFreeQueue::<u64>::with_capacity(8);
    assert!(queue.is_empty());
    assert_eq!(queue.len(), 0);
    assert_eq!(queue.pop(), None);

    for round in 0..100 {
        for value in 0..5 {
            queue.push(round * 10 + value);
        }
        let popped: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(popped, (0..5).map(|value| round * 10 + value).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }
}
