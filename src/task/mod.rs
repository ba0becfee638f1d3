//! Task abstractions and the conveniences built on them.
//!
//! The crate does not fix a scheduling policy. Anything implementing
//! [`TaskManager`] can run tasks: the bundled
//! [`FiberExecutor`](crate::executor::FiberExecutor), the synchronous
//! [`InlineTaskManager`], or a caller-supplied scheduler. [`spawn`],
//! [`spawn_future`] and [`parallel_for_range`] only talk to that trait.

mod future;
mod inline;
mod parallel;

pub use future::{spawn_future, TaskFuture};
pub use inline::InlineTaskManager;
pub use parallel::{parallel_for, parallel_for_range};

use crate::config::WaitStrategy;
use crate::fiber::FiberId;

/// Capabilities handed to a task while it runs.
pub trait TaskContext {
    /// The fiber executing the task, if the manager runs tasks on fibers.
    fn fiber(&self) -> Option<FiberId>;
}

/// A unit of work that can be run by reference.
///
/// Borrowed tasks are what [`TaskManager::run_and_wait_for`] accepts, so the
/// same task may be observed from several threads while it runs.
pub trait Task: Send + Sync {
    fn run(&self, ctx: &dyn TaskContext);
}

impl<F> Task for F
where
    F: Fn(&dyn TaskContext) + Send + Sync,
{
    fn run(&self, ctx: &dyn TaskContext) {
        self(ctx)
    }
}

/// An owned, run-once task. The manager drops it after running it.
pub type BoxedTask = Box<dyn FnOnce(&dyn TaskContext) + Send + 'static>;

/// Scheduling policy the conveniences in this module are written against.
pub trait TaskManager: Send + Sync {
    /// Queues `task` and returns without waiting for it.
    fn run(&self, task: BoxedTask, priority: TaskPriority);

    /// Runs every task in `tasks` and returns once all of them have finished.
    ///
    /// Callable from inside a running task; a manager must not deadlock
    /// when tasks fork further work.
    fn run_and_wait_for(&self, tasks: &[&dyn Task], priority: TaskPriority);

    /// How futures created through this manager wait for their result.
    fn wait_strategy(&self) -> WaitStrategy {
        WaitStrategy::default()
    }
}

/// Queue priority of a task. Higher variants are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TaskPriority {
    Background = 0,
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Realtime = 4,
}

impl From<TaskPriority> for u32 {
    fn from(priority: TaskPriority) -> u32 {
        priority as u32
    }
}

/// Queues `f` on `manager` without waiting for it.
pub fn spawn<M, F>(manager: &M, f: F, priority: TaskPriority)
where
    M: TaskManager + ?Sized,
    F: FnOnce() + Send + 'static,
{
    manager.run(Box::new(move |_: &dyn TaskContext| f()), priority);
}
