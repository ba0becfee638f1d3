//! State shared by every worker fiber, and the loop they run.

use super::panic_handler::{PanicHandler, PanicStrategy};
use super::wait_group::WaitGroup;
use crate::fiber::{CurrentFiber, FiberHandle, FiberId, YieldMode};
use crate::queue::{BoundedQueue, PriorityQueue};
use crate::task::{BoxedTask, Task, TaskContext};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

pub(crate) enum Job {
    Owned(BoxedTask),
    /// Borrowed from a `run_and_wait_for` caller that stays blocked until
    /// `group` completes, which is what makes the `'static` sound.
    Scoped {
        task: &'static dyn Task,
        group: Arc<WaitGroup>,
    },
}

impl Job {
    /// Wraps a borrowed task as a job counted by `group`.
    ///
    /// # Safety
    ///
    /// `task` must stay alive until the job has run, which the caller ensures
    /// by not returning before `group` finishes.
    pub(crate) unsafe fn scoped(task: &dyn Task, group: &Arc<WaitGroup>) -> Job {
        let task: &'static dyn Task = std::mem::transmute(task);
        Job::Scoped {
            task,
            group: group.clone(),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Owned(_) => f.write_str("Job::Owned"),
            Job::Scoped { .. } => f.write_str("Job::Scoped"),
        }
    }
}

struct WorkerContext {
    fiber: Option<FiberId>,
}

impl TaskContext for WorkerContext {
    fn fiber(&self) -> Option<FiberId> {
        self.fiber
    }
}

pub(crate) struct Scheduler {
    pub(crate) queue: PriorityQueue<Job>,
    /// Hibernated fibers whose wait has completed.
    pub(crate) ready: BoundedQueue<FiberHandle>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) panic_handler: PanicHandler,
    jobs_executed: AtomicU64,
    idle_wait: Duration,
}

impl Scheduler {
    pub(crate) fn new(
        queue_capacity: usize,
        fiber_capacity: usize,
        panic_strategy: PanicStrategy,
        idle_wait: Duration,
    ) -> Self {
        Self {
            queue: PriorityQueue::new(queue_capacity),
            ready: BoundedQueue::new(fiber_capacity),
            shutdown: AtomicBool::new(false),
            panic_handler: PanicHandler::new(panic_strategy),
            jobs_executed: AtomicU64::new(0),
            idle_wait,
        }
    }

    pub(crate) fn jobs_executed(&self) -> u64 {
        self.jobs_executed.load(Ordering::Relaxed)
    }

    // one iteration of the pool entry loop
    pub(crate) fn run_once(&self, fiber: &CurrentFiber<'_>) {
        // Priority: woken waiters -> shutdown -> queued jobs
        if let Some(waiter) = self.ready.try_consume() {
            trace!(from = %fiber.id(), to = %waiter.id(), "resuming waiter");
            fiber.yield_to(Some(waiter), YieldMode::Release);
            return;
        }

        if self.shutdown.load(Ordering::Acquire) && self.queue.is_empty() {
            fiber.exit_thread();
            return;
        }

        if let Some(job) = self.queue.consume_timeout(self.idle_wait) {
            self.execute(job, Some(fiber.id()));
        }
    }

    /// Runs one job; `fiber` is `None` when called off the pool.
    pub(crate) fn execute(&self, job: Job, fiber: Option<FiberId>) {
        let ctx = WorkerContext { fiber };
        match job {
            Job::Owned(task) => {
                let _ = self.panic_handler.execute(|| task(&ctx));
            }
            Job::Scoped { task, group } => {
                let _ = self.panic_handler.execute(|| task.run(&ctx));
                group.task_done(&self.ready);
            }
        }
        self.jobs_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Runs a borrowed task right here, on `fiber` or off the pool.
    pub(crate) fn run_inline(&self, task: &dyn Task, fiber: Option<FiberId>) {
        let ctx = WorkerContext { fiber };
        let _ = self.panic_handler.execute(|| task.run(&ctx));
        self.jobs_executed.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("queued", &self.queue.len())
            .field("ready", &self.ready.len())
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .field("jobs_executed", &self.jobs_executed())
            .finish()
    }
}
