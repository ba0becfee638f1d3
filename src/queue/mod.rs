//! Blocking work queues.
//!
//! Both queues are fixed-capacity and thread-safe: producers block while a
//! queue is full and consumers block while it is empty. Blocking parks the
//! whole OS thread, fiber included.

mod bounded;
mod priority;

pub use bounded::BoundedQueue;
pub use priority::{PriorityQueue, QueueKey};
