//! Fixed-capacity blocking FIFO.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::{Duration, Instant};

struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
}

impl<T> Ring<T> {
    fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail)
    }

    fn push(&mut self, value: T) {
        let capacity = self.slots.len();
        let slot = &mut self.slots[self.head % capacity];
        debug_assert!(slot.is_none());
        *slot = Some(value);
        self.head = self.head.wrapping_add(1);
    }

    fn pop(&mut self) -> T {
        let capacity = self.slots.len();
        let value = self.slots[self.tail % capacity]
            .take()
            .expect("ring slot between tail and head is always filled");
        self.tail = self.tail.wrapping_add(1);
        value
    }
}

/// Circular buffer of fixed capacity guarded by one mutex and a pair of
/// condition variables.
///
/// A full queue blocks producers and an empty one blocks consumers; nothing is
/// ever dropped and the buffer never grows. Values from a single producer come
/// out in the order they went in.
pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded queue capacity must be > 0");
        let slots = (0..capacity).map(|_| None).collect();
        Self {
            ring: Mutex::new(Ring {
                slots,
                head: 0,
                tail: 0,
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

    /// Number of values currently queued.
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `value`, blocking the calling thread while the queue is full.
    pub fn produce(&self, value: T) {
        let mut ring = self.ring.lock();
        while ring.len() == self.capacity {
            self.not_full.wait(&mut ring);
        }
        ring.push(value);
        drop(ring);
        self.not_empty.notify_one();
    }

    /// Appends `value` unless the queue is full, in which case it is handed
    /// back.
    pub fn try_produce(&self, value: T) -> Result<(), T> {
        let mut ring = self.ring.lock();
        if ring.len() == self.capacity {
            return Err(value);
        }
        ring.push(value);
        drop(ring);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest value, blocking the calling thread while the queue
    /// is empty.
    pub fn consume(&self) -> T {
        let mut ring = self.ring.lock();
        while ring.len() == 0 {
            self.not_empty.wait(&mut ring);
        }
        let value = ring.pop();
        drop(ring);
        self.not_full.notify_one();
        value
    }

    /// Removes the oldest value if there is one. Never blocks on an empty
    /// queue and leaves it untouched.
    pub fn try_consume(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        if ring.len() == 0 {
            return None;
        }
        let value = ring.pop();
        drop(ring);
        self.not_full.notify_one();
        Some(value)
    }

    /// Like [`consume`](Self::consume), but gives up after `timeout`.
    ///
    /// A timeout too large to be represented as a deadline waits forever.
    pub fn consume_timeout(&self, timeout: Duration) -> Option<T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.consume());
        };
        let mut ring = self.ring.lock();
        while ring.len() == 0 {
            if self.not_empty.wait_until(&mut ring, deadline).timed_out() && ring.len() == 0 {
                return None;
            }
        }
        let value = ring.pop();
        drop(ring);
        self.not_full.notify_one();
        Some(value)
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(4);
        for i in 0..4 {
            queue.produce(i);
        }
        assert_eq!(queue.len(), 4);

        let drained: Vec<_> = (0..4).map(|_| queue.consume()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wraps_around() {
        let queue = BoundedQueue::new(3);
        for round in 0..10 {
            queue.produce(round * 2);
            queue.produce(round * 2 + 1);
            assert_eq!(queue.consume(), round * 2);
            assert_eq!(queue.consume(), round * 2 + 1);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_try_variants() {
        let queue = BoundedQueue::new(1);
        assert_eq!(queue.try_consume(), None);

        assert!(queue.try_produce("a").is_ok());
        assert_eq!(queue.try_produce("b"), Err("b"));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.try_consume(), Some("a"));
        assert_eq!(queue.try_consume(), None);
    }

    #[test]
    fn test_consume_timeout_on_empty() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(2);
        let start = Instant::now();
        assert_eq!(queue.consume_timeout(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));

        queue.produce(9);
        assert_eq!(queue.consume_timeout(Duration::from_millis(20)), Some(9));
    }

    #[test]
    fn test_consume_timeout_with_unbounded_wait() {
        let queue = BoundedQueue::new(1);
        queue.produce('x');
        assert_eq!(queue.consume_timeout(Duration::MAX), Some('x'));

        let queue = Arc::new(BoundedQueue::new(1));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.consume_timeout(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        queue.produce('y');
        assert_eq!(consumer.join().unwrap(), Some('y'));
    }

    #[test]
    fn test_producer_blocks_when_full() {
        let queue = Arc::new(BoundedQueue::new(2));
        queue.produce(1);
        queue.produce(2);

        let returned = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = queue.clone();
            let returned = returned.clone();
            thread::spawn(move || {
                queue.produce(3);
                returned.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!returned.load(Ordering::SeqCst), "producer ran past a full queue");

        assert_eq!(queue.consume(), 1);
        producer.join().unwrap();
        assert!(returned.load(Ordering::SeqCst));

        assert_eq!(queue.consume(), 2);
        assert_eq!(queue.consume(), 3);
    }

    #[test]
    fn test_consumer_blocks_until_produce() {
        let queue = Arc::new(BoundedQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.consume())
        };

        thread::sleep(Duration::from_millis(20));
        queue.produce(42u64);
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn test_many_producers_many_consumers() {
        let queue = Arc::new(BoundedQueue::new(8));
        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..1_000u64 {
                        queue.produce(p * 1_000 + i);
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || (0..1_000).map(|_| queue.consume()).sum::<u64>())
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        let total: u64 = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        assert_eq!(total, (0..4_000u64).sum());
        assert!(queue.is_empty());
    }
}
