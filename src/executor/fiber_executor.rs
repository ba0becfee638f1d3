use super::wait_group::WaitGroup;
use super::worker::{Job, Scheduler};
use crate::config::{Config, WaitStrategy};
use crate::error::{Error, Result};
use crate::fiber::{FiberId, FiberPool, YieldMode};
use crate::task::{BoxedTask, Task, TaskManager, TaskPriority};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

#[cfg(target_os = "linux")]
fn pin_thread_to_core(core_id: usize) {
    // SAFETY: `cpuset` is a plain bitmask, zero-initialised and only passed
    // to the kernel by pointer for the calling thread.
    let result = unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core_id, &mut cpuset);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpuset)
    };
    if result != 0 {
        warn!(
            thread = thread::current().name().unwrap_or("unknown"),
            core_id,
            "failed to pin worker thread"
        );
    }
}

/// Reference [`TaskManager`]: a fixed set of OS threads running fibers from
/// one [`FiberPool`], fed by a [`PriorityQueue`](crate::queue::PriorityQueue).
///
/// Each worker thread loops in [`FiberPool::start_thread`]. Its fiber pulls
/// the highest-priority job and runs it. A job that calls
/// [`run_and_wait_for`](TaskManager::run_and_wait_for) hibernates its fiber
/// instead of blocking the thread, and a fresh fiber keeps the thread busy
/// until the forked tasks complete. The last one to finish puts the waiter on
/// the ready list, and the next idle fiber on any worker resumes it.
///
/// Every level of nested fork-join keeps one fiber hibernated. Once the pool
/// has no fiber left, or the queue is full, a task's forked work runs inline
/// on its own fiber instead of being handed to the workers.
///
/// Dropping the executor joins its workers, so the last handle to it must
/// not be dropped from inside one of its own tasks.
pub struct FiberExecutor {
    pool: Arc<FiberPool>,
    scheduler: Arc<Scheduler>,
    workers: Vec<WorkerHandle>,
    num_threads: usize,
    wait_strategy: WaitStrategy,
}

struct WorkerHandle {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl FiberExecutor {
    /// Validates `config`, builds the fiber pool and starts the workers.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let num_threads = config.worker_threads();

        let scheduler = Arc::new(Scheduler::new(
            config.queue_capacity,
            config.fiber_capacity,
            config.panic_strategy,
            config.idle_wait,
        ));

        let entry = scheduler.clone();
        let pool = FiberPool::new(config, move |fiber| entry.run_once(fiber))?;

        let mut executor = Self {
            pool,
            scheduler,
            workers: Vec::with_capacity(num_threads),
            num_threads,
            wait_strategy: config.wait_strategy,
        };

        let cores = num_cpus::get().max(1);
        for id in 0..num_threads {
            let pool = executor.pool.clone();
            let name = format!("{}-{}", config.thread_name_prefix, id);
            let pin_workers = config.pin_workers;

            let spawned = thread::Builder::new().name(name).spawn(move || {
                #[cfg(target_os = "linux")]
                if pin_workers {
                    pin_thread_to_core(id % cores);
                }
                #[cfg(not(target_os = "linux"))]
                let _ = (pin_workers, cores);

                pool.start_thread();
            });

            match spawned {
                Ok(thread) => executor.workers.push(WorkerHandle {
                    id,
                    thread: Some(thread),
                }),
                Err(e) => {
                    // already-spawned workers are joined by Drop
                    return Err(Error::executor(format!("spawn failed: {}", e)));
                }
            }
        }

        debug!(
            threads = num_threads,
            fibers = config.fiber_capacity,
            "fiber executor started"
        );
        Ok(executor)
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// The fiber pool the workers run on.
    pub fn pool(&self) -> &FiberPool {
        &self.pool
    }

    /// Jobs waiting in the queue, not counting those already running.
    pub fn pending_tasks(&self) -> usize {
        self.scheduler.queue.len()
    }

    /// Jobs run to completion or caught panicking so far.
    pub fn tasks_executed(&self) -> u64 {
        self.scheduler.jobs_executed()
    }

    /// Task panics caught by the panic handler.
    pub fn panic_count(&self) -> usize {
        self.scheduler.panic_handler.panic_count()
    }

    /// Lets the workers drain the queue, then joins them.
    ///
    /// Returns [`Error::WorkerPanic`] if a worker thread died; task panics
    /// are handled by the panic strategy and do not count.
    pub fn shutdown(&mut self) -> Result<()> {
        self.scheduler.shutdown.store(true, Ordering::Release);

        let mut failed = Vec::new();
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    failed.push(worker.id);
                }
            }
        }

        if failed.is_empty() {
            debug!(tasks = self.tasks_executed(), "fiber executor shut down");
            Ok(())
        } else {
            Err(Error::WorkerPanic(format!("workers {:?} panicked", failed)))
        }
    }

    fn is_shut_down(&self) -> bool {
        self.scheduler.shutdown.load(Ordering::Acquire)
    }

    /// Queues borrowed tasks as scoped jobs counted by `group`, blocking
    /// while the queue is full. Only for callers outside the pool.
    fn enqueue_scoped(&self, tasks: &[&dyn Task], priority: TaskPriority, group: &Arc<WaitGroup>) {
        self.scheduler.queue.produce_batch(
            priority.into(),
            tasks.len(),
            self.num_threads,
            // SAFETY: the caller of `run_and_wait_for` does not return until
            // `group` has finished, i.e. until every job built here has run.
            |i| unsafe { Job::scoped(tasks[i], group) },
        );
    }

    /// Queues what fits of `tasks` without blocking and runs the rest on the
    /// calling fiber. Returns how many were queued.
    fn offer_scoped(
        &self,
        tasks: &[&dyn Task],
        priority: TaskPriority,
        group: &Arc<WaitGroup>,
        fiber: FiberId,
    ) -> usize {
        let mut queued = 0;
        for task in tasks {
            // SAFETY: as in `enqueue_scoped`; jobs that do not fit run before
            // this returns.
            let job = unsafe { Job::scoped(*task, group) };
            match self.scheduler.queue.try_produce(priority.into(), job) {
                Ok(()) => queued += 1,
                Err(job) => {
                    trace!(%fiber, "queue full, running scoped job inline");
                    self.scheduler.execute(job, Some(fiber));
                }
            }
        }
        queued
    }
}

impl TaskManager for FiberExecutor {
    fn run(&self, task: BoxedTask, priority: TaskPriority) {
        if self.is_shut_down() {
            debug!("running task inline after shutdown");
            self.scheduler.execute(Job::Owned(task), None);
            return;
        }

        match self.pool.current_fiber() {
            // a worker must not block on the queue it is meant to drain
            Some(fiber) => {
                let job = Job::Owned(task);
                if let Err(job) = self.scheduler.queue.try_produce(priority.into(), job) {
                    trace!(fiber = %fiber.id(), "queue full, running task inline");
                    self.scheduler.execute(job, Some(fiber.id()));
                }
            }
            None => self.scheduler.queue.produce(priority.into(), Job::Owned(task)),
        }
    }

    fn run_and_wait_for(&self, tasks: &[&dyn Task], priority: TaskPriority) {
        if tasks.is_empty() {
            return;
        }

        if self.is_shut_down() {
            debug!(tasks = tasks.len(), "running fork-join inline after shutdown");
            for task in tasks {
                self.scheduler.run_inline(*task, None);
            }
            return;
        }

        match self.pool.current_fiber() {
            Some(fiber) => {
                // The fiber that takes over this thread is acquired before any
                // job is queued, so exhaustion never strands borrowed tasks.
                let Some(helper) = self.pool.try_acquire_fiber() else {
                    warn!(
                        fiber = %fiber.id(),
                        tasks = tasks.len(),
                        "fiber pool exhausted, running fork-join inline"
                    );
                    for task in tasks {
                        self.scheduler.run_inline(*task, Some(fiber.id()));
                    }
                    return;
                };

                // the extra count is dropped by the park callback, after the
                // waiter's handle is stored
                let group = Arc::new(WaitGroup::new(tasks.len() + 1));
                if self.offer_scoped(tasks, priority, &group, fiber.id()) == 0 {
                    self.pool.release_fiber(helper);
                    return;
                }

                let parked = group.clone();
                let scheduler = self.scheduler.clone();
                fiber.yield_to(
                    Some(helper),
                    YieldMode::Hibernate(Box::new(move |handle| {
                        parked.park(handle, &scheduler.ready)
                    })),
                );
                debug_assert!(group.is_finished());
            }
            None => {
                let group = Arc::new(WaitGroup::new(tasks.len()));
                self.enqueue_scoped(tasks, priority, &group);
                group.wait();
            }
        }
    }

    fn wait_strategy(&self) -> WaitStrategy {
        self.wait_strategy
    }
}

impl fmt::Debug for FiberExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberExecutor")
            .field("num_threads", &self.num_threads)
            .field("pool", &self.pool)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Drop for FiberExecutor {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "fiber executor shut down with errors");
        }
    }
}
