//! weft - cooperative task concurrency on stackful fibers
//!
//! Building blocks for schedulers that suspend and resume work without OS
//! thread switches:
//!
//! - [`fiber`]: a fixed-capacity pool of stackful fibers and the yield
//!   protocol between them.
//! - [`queue`]: a bounded blocking FIFO and a bounded priority queue that is
//!   FIFO within a priority.
//! - [`task`]: futures, fire-and-forget spawning and fork-join loops written
//!   against the [`TaskManager`] trait.
//! - [`executor`]: [`FiberExecutor`], a reference `TaskManager` tying the
//!   three together.
//!
//! # Quick Start
//!
//! ```no_run
//! use weft_rs::prelude::*;
//!
//! let executor = FiberExecutor::new(&Config::default()).unwrap();
//!
//! let answer = spawn_future(&executor, || 6 * 7, TaskPriority::Normal);
//! assert_eq!(*answer.result(), 42);
//!
//! let squares: Vec<_> = (0..64).map(|_| std::sync::atomic::AtomicUsize::new(0)).collect();
//! parallel_for(&executor, 0..64, |i| {
//!     squares[i].store(i * i, std::sync::atomic::Ordering::Relaxed);
//! }, TaskPriority::High);
//! ```

#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod executor;
pub mod fiber;
pub mod prelude;
pub mod queue;
pub mod task;
pub mod util;

pub use config::{Config, ConfigBuilder, WaitStrategy};
pub use error::{Error, Result};
pub use executor::FiberExecutor;
pub use task::{Task, TaskContext, TaskManager, TaskPriority};
