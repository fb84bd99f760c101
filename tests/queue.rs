use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::thread::scope;
use lockfree_pool::Queue;

const PRODUCERS: usize = 4;
const CONSUMERS: usize = 4;
const COUNT: usize = 100_000;

#[test]
fn push_pop_1() {
    let q: Queue<i64> = Queue::new();
    q.push(37);
    assert_eq!(q.pop(), Some(37));
}

#[test]
fn push_pop_2() {
    let q: Queue<i64> = Queue::new();
    q.push(37);
    q.push(48);
    assert_eq!(q.pop(), Some(37));
    assert_eq!(q.pop(), Some(48));
}

#[test]
fn push_pop_empty_check() {
    let q: Queue<i64> = Queue::new();
    assert_eq!(q.is_empty(), true);
    q.push(42);
    assert_eq!(q.is_empty(), false);
    assert_eq!(q.pop(), Some(42));
    assert_eq!(q.is_empty(), true);
}

#[test]
fn pop_empty_does_not_allocate() {
    let q: Queue<i64> = Queue::with_capacity(4);
    assert_eq!(q.pop(), None);
    assert_eq!(q.capacity(), 4);
}

#[test]
fn push_pop_many_seq() {
    let q: Queue<i64> = Queue::new();
    for i in 0..200 {
        q.push(i)
    }
    for i in 0..200 {
        assert_eq!(q.pop(), Some(i));
    }
}

// Every interleaving of s pushes, c pops, c pushes, s pops against a
// single-threaded reference deque.
#[test]
fn push_pop_combinations() {
    for s in 0..5usize {
        for c in 0..s {
            let q: Queue<usize> = Queue::with_capacity(8);
            let mut reference = VecDeque::new();
            let mut id = 0;

            for _ in 0..s {
                q.push(id);
                reference.push_back(id);
                id += 1;
            }
            for _ in 0..c {
                assert_eq!(q.pop(), reference.pop_front());
            }
            for _ in 0..c {
                q.push(id);
                reference.push_back(id);
                id += 1;
            }
            for _ in 0..s {
                assert_eq!(q.pop(), reference.pop_front());
            }
            assert!(q.is_empty());
        }
    }
}

// Pushing past the initial capacity grows the queue without reordering it.
#[test]
fn push_beyond_capacity() {
    let q: Queue<usize> = Queue::with_capacity(8);
    let total = q.capacity() + 1;

    for i in 0..total {
        q.push(i);
    }
    assert!(q.capacity() >= total);

    for i in 0..total {
        assert_eq!(q.pop(), Some(i));
    }
    assert!(q.is_empty());
}

#[test]
fn capacity_monotonic() {
    let q: Queue<usize> = Queue::with_capacity(2);
    let mut last = q.capacity();
    for i in 0..64 {
        q.push(i);
        let cap = q.capacity();
        assert!(cap >= last);
        last = cap;
    }
}

#[test]
fn push_pop_many_spsc() {
    let q: Queue<i64> = Queue::new();

    scope(|scope| {
        scope.spawn(|_| {
            let mut next = 0;

            while next < COUNT as i64 {
                if let Some(elem) = q.pop() {
                    assert_eq!(elem, next);
                    next += 1;
                }
            }
        });

        for i in 0..COUNT as i64 {
            q.push(i)
        }
    })
    .unwrap();

    assert!(q.is_empty());
}

// Each producer owns a disjoint ID range; each ID must come out exactly
// once, and per-producer order must survive.
#[test]
fn push_pop_many_mpmc() {
    for _ in 0..4 {
        let q: Queue<usize> = Queue::new();
        let seen: Vec<AtomicUsize> = (0..COUNT).map(|_| AtomicUsize::new(0)).collect();
        let consumed = AtomicUsize::new(0);

        scope(|scope| {
            for p in 0..PRODUCERS {
                let q = &q;
                scope.spawn(move |_| {
                    let share = COUNT / PRODUCERS;
                    for i in p * share..(p + 1) * share {
                        q.push(i);
                    }
                });
            }

            for _ in 0..CONSUMERS {
                let q = &q;
                let seen = &seen;
                let consumed = &consumed;
                scope.spawn(move |_| {
                    while consumed.load(Ordering::SeqCst) < COUNT {
                        if let Some(i) = q.pop() {
                            assert_eq!(seen[i].fetch_add(1, Ordering::SeqCst), 0);
                            consumed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(consumed.load(Ordering::SeqCst), COUNT);
        assert!(seen.iter().all(|s| s.load(Ordering::SeqCst) == 1));
        assert!(q.is_empty());
    }
}

// A consumer never observes producer P's second value before its first.
#[test]
fn per_producer_fifo() {
    let q: Queue<(usize, usize)> = Queue::new();

    scope(|scope| {
        for p in 0..PRODUCERS {
            let q = &q;
            scope.spawn(move |_| {
                for seq in 0..COUNT / PRODUCERS {
                    q.push((p, seq));
                }
            });
        }

        let q = &q;
        scope.spawn(move |_| {
            let mut last = vec![None; PRODUCERS];
            let mut popped = 0;
            while popped < COUNT {
                if let Some((p, seq)) = q.pop() {
                    if let Some(prev) = last[p] {
                        assert!(seq > prev);
                    }
                    last[p] = Some(seq);
                    popped += 1;
                }
            }
        });
    })
    .unwrap();
}

#[test]
fn drops() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, PartialEq)]
    struct DropCounter;

    impl Drop for DropCounter {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    // Popped values drop at the caller; values still queued drop with the
    // queue.
    let q: Queue<DropCounter> = Queue::with_capacity(4);
    for _ in 0..8 {
        q.push(DropCounter);
    }
    for _ in 0..3 {
        q.pop().unwrap();
    }
    assert_eq!(DROPS.load(Ordering::SeqCst), 3);

    drop(q);
    assert_eq!(DROPS.load(Ordering::SeqCst), 8);
}
