//! Cross-thread stress tests for the queue, the pool and sample refcounts.

use millrace::memory::MemoryType;
use millrace::pool::Pool;
use millrace::queue::{Queue, SignalledQueue};
use millrace::sample::Sample;
use millrace::Error;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Four producers and four consumers hammer one small ring. Every pushed
/// value comes out exactly once: nothing lost, nothing duplicated, nothing
/// invented.
#[test]
fn test_mpmc_queue_neither_loses_nor_invents() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 2000;
    const TOTAL: usize = (PRODUCERS * PER_PRODUCER) as usize;

    let queue = Arc::new(Queue::<u64>::new(64));
    let consumed = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut value = p * PER_PRODUCER + i;
                    loop {
                        match queue.push(value) {
                            Ok(()) => break,
                            Err(back) => {
                                value = back;
                                thread::yield_now();
                            }
                        }
                    }
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || {
                let mut local = Vec::new();
                loop {
                    match queue.pull() {
                        Some(value) => {
                            local.push(value);
                            consumed.fetch_add(1, Ordering::Relaxed);
                        }
                        None => {
                            if consumed.load(Ordering::Relaxed) >= TOTAL {
                                break;
                            }
                            thread::yield_now();
                        }
                    }
                }
                local
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    let mut seen: Vec<u64> = consumers
        .into_iter()
        .flat_map(|c| c.join().unwrap())
        .collect();

    seen.sort_unstable();
    let expected: Vec<u64> = (0..PRODUCERS * PER_PRODUCER).collect();
    assert_eq!(seen, expected);
    assert_eq!(queue.pull(), None);
}

/// Concurrent get/put churn never corrupts the free list: afterwards the
/// pool holds exactly its original block set.
#[test]
fn test_pool_block_set_survives_contention() {
    let pool = Pool::new(16, 64, MemoryType::Heap).unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let mut blocks = Vec::new();
                for round in 0..1000 {
                    pool.get_many(&mut blocks, 4);
                    if round % 2 == 0 {
                        blocks.reverse();
                    }
                    let returned = pool.put_many(&blocks);
                    assert_eq!(returned, blocks.len());
                    blocks.clear();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(pool.available(), pool.capacity());

    // Drain once more: all blocks distinct, none forged.
    let mut blocks = Vec::new();
    assert_eq!(pool.get_many(&mut blocks, pool.capacity() + 1), pool.capacity());
    let addrs: HashSet<usize> = blocks.iter().map(|b| b.as_ptr() as usize).collect();
    assert_eq!(addrs.len(), pool.capacity());
    pool.put_many(&blocks);
}

/// Clones of one sample dropped on three other threads: the block returns
/// to the pool exactly once, and only after the last handle goes.
#[test]
fn test_refcount_storm_settles_to_full_pool() {
    const SAMPLES: u64 = 500;

    let pool = Pool::new(32, Sample::bytes_required(8), MemoryType::Heap).unwrap();
    let lanes: Vec<Arc<SignalledQueue<Sample>>> =
        (0..3).map(|_| Arc::new(SignalledQueue::new(64))).collect();

    let consumers: Vec<_> = lanes
        .iter()
        .map(|lane| {
            let lane = Arc::clone(lane);
            thread::spawn(move || {
                let mut last_seen = 0;
                loop {
                    match lane.pull_timeout(Duration::from_secs(5)) {
                        Ok(Some(smp)) => last_seen = smp.sequence(),
                        Ok(None) | Err(_) => break,
                    }
                }
                last_seen
            })
        })
        .collect();

    let producer = {
        let pool = Arc::clone(&pool);
        let lanes = lanes.clone();
        thread::spawn(move || {
            for seq in 0..SAMPLES {
                let mut smp = loop {
                    match Sample::alloc(&pool) {
                        Ok(smp) => break smp,
                        Err(_) => thread::yield_now(),
                    }
                };
                smp.set_sequence(seq);
                for lane in &lanes {
                    let mut clone = smp.clone();
                    // Full lane: keep the clone and retry until a consumer
                    // makes room.
                    while let Err(back) = lane.push(clone) {
                        clone = back;
                        thread::yield_now();
                    }
                }
            }
        })
    };

    producer.join().unwrap();
    for lane in &lanes {
        lane.close();
    }
    for consumer in consumers {
        assert_eq!(consumer.join().unwrap(), SAMPLES - 1);
    }

    assert_eq!(pool.available(), pool.capacity());

    // Every block is individually allocatable again.
    let revived = Sample::alloc_many(&pool, pool.capacity());
    assert_eq!(revived.len(), pool.capacity());
}

/// Closing a signalled queue wakes every parked consumer at once.
#[test]
fn test_close_wakes_all_parked_consumers() {
    let queue = Arc::new(SignalledQueue::<u32>::new(8));

    let parked: Vec<_> = (0..3)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pull_timeout(Duration::from_secs(10)))
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    queue.close();

    for consumer in parked {
        assert!(matches!(consumer.join().unwrap(), Err(Error::Stopped)));
    }
}
