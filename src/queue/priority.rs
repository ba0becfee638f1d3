//! Blocking bounded priority queue with FIFO order inside a priority tier.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::{Duration, Instant};

/// Total order used by the heap: higher `priority` first, then lower
/// `sequence` (earlier insertion) first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub priority: u32,
    pub sequence: u64,
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct Entry<T> {
    key: QueueKey,
    value: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key.cmp(&other.key)
    }
}

struct Heap<T> {
    entries: BinaryHeap<Entry<T>>,
    next_sequence: u64,
}

impl<T> Heap<T> {
    fn push(&mut self, priority: u32, value: T) {
        let sequence = self.next_sequence;
        assert!(sequence != u64::MAX, "priority queue sequence overflow");
        self.next_sequence += 1;
        self.entries.push(Entry {
            key: QueueKey { priority, sequence },
            value,
        });
    }

    fn pop(&mut self) -> Option<T> {
        let entry = self.entries.pop()?;
        if self.entries.is_empty() {
            self.next_sequence = 0;
        }
        Some(entry.value)
    }
}

/// Bounded queue ordered by priority, FIFO within equal priority.
///
/// Larger priority values are consumed first. Every insertion is stamped with
/// a sequence number so that two values of the same priority leave in the
/// order they arrived; the counter restarts at zero each time the queue
/// drains.
pub struct PriorityQueue<T> {
    heap: Mutex<Heap<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> PriorityQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "priority queue capacity must be > 0");
        Self {
            heap: Mutex::new(Heap {
                entries: BinaryHeap::with_capacity(capacity),
                next_sequence: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Maximum number of values held at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `value`, blocking while the queue is full.
    pub fn produce(&self, priority: u32, value: T) {
        let mut heap = self.heap.lock();
        while heap.entries.len() >= self.capacity {
            self.not_full.wait(&mut heap);
        }
        heap.push(priority, value);
        drop(heap);
        self.not_empty.notify_one();
    }

    /// Inserts `value` unless the queue is full, in which case it is handed
    /// back.
    pub fn try_produce(&self, priority: u32, value: T) -> Result<(), T> {
        let mut heap = self.heap.lock();
        if heap.entries.len() >= self.capacity {
            return Err(value);
        }
        heap.push(priority, value);
        drop(heap);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Inserts `generator(0..count)` at one priority, at most `stride` values
    /// per lock acquisition.
    ///
    /// Consumers are woken after every batch, so a large submission cannot
    /// hold the lock long enough to starve them. `stride` is meant to match
    /// the number of consuming threads.
    ///
    /// # Panics
    ///
    /// Panics if `stride` is zero.
    pub fn produce_batch<F>(&self, priority: u32, count: usize, stride: usize, mut generator: F)
    where
        F: FnMut(usize) -> T,
    {
        assert!(stride > 0, "produce_batch stride must be > 0");

        let mut produced = 0;
        while produced < count {
            let mut heap = self.heap.lock();
            while heap.entries.len() >= self.capacity {
                self.not_full.wait(&mut heap);
            }

            let room = self.capacity - heap.entries.len();
            let batch = stride.min(room).min(count - produced);
            for _ in 0..batch {
                heap.push(priority, generator(produced));
                produced += 1;
            }
            drop(heap);
            self.not_empty.notify_all();
        }
    }

    /// Removes the highest-priority, earliest-inserted value, blocking while
    /// the queue is empty.
    pub fn consume(&self) -> T {
        let mut heap = self.heap.lock();
        let value = loop {
            if let Some(value) = heap.pop() {
                break value;
            }
            self.not_empty.wait(&mut heap);
        };
        drop(heap);
        self.not_full.notify_all();
        value
    }

    /// Non-blocking [`consume`](Self::consume); `None` leaves the queue as it
    /// was.
    pub fn try_consume(&self) -> Option<T> {
        let value = self.heap.lock().pop()?;
        self.not_full.notify_all();
        Some(value)
    }

    /// Like [`consume`](Self::consume), but gives up after `timeout`.
    ///
    /// A timeout too large to be represented as a deadline waits forever.
    pub fn consume_timeout(&self, timeout: Duration) -> Option<T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.consume());
        };
        let mut heap = self.heap.lock();
        let value = loop {
            if let Some(value) = heap.pop() {
                break value;
            }
            if self.not_empty.wait_until(&mut heap, deadline).timed_out() {
                let value = heap.pop()?;
                break value;
            }
        };
        drop(heap);
        self.not_full.notify_all();
        Some(value)
    }
}

impl<T> fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
