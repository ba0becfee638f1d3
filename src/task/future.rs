//! Single-assignment result cell filled by a task.

use super::{Task, TaskContext, TaskManager, TaskPriority};
use crate::config::WaitStrategy;
use crate::util::Backoff;
use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const PENDING: u8 = 0;
const READY: u8 = 1;
const POISONED: u8 = 2;

type Producer<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// A callable together with the slot its result lands in.
///
/// The future is itself a [`Task`]: hand it to a [`TaskManager`] (or call
/// [`run`](TaskFuture::run) directly) and any number of threads can then
/// block in [`result`](TaskFuture::result) until the value is published.
/// The value is written exactly once; running the future a second time
/// panics.
///
/// If the callable panics the future is poisoned and every `result` call
/// panics instead of waiting forever.
pub struct TaskFuture<T> {
    producer: Mutex<Option<Producer<T>>>,
    value: UnsafeCell<MaybeUninit<T>>,
    state: AtomicU8,
    strategy: WaitStrategy,
    lock: Mutex<()>,
    published: Condvar,
}

// SAFETY: `value` is written once, by the thread that took `producer`, before
// `state` becomes READY with release ordering; readers only touch it after
// observing READY with acquire ordering. Shared readers get `&T`, hence the
// `T: Sync` bound.
unsafe impl<T: Send + Sync> Sync for TaskFuture<T> {}

impl<T> TaskFuture<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::with_strategy(f, WaitStrategy::default())
    }

    pub fn with_strategy<F>(f: F, strategy: WaitStrategy) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            producer: Mutex::new(Some(Box::new(f))),
            value: UnsafeCell::new(MaybeUninit::uninit()),
            state: AtomicU8::new(PENDING),
            strategy,
            lock: Mutex::new(()),
            published: Condvar::new(),
        }
    }

    pub fn wait_strategy(&self) -> WaitStrategy {
        self.strategy
    }

    /// Runs the callable and publishes its result.
    ///
    /// # Panics
    ///
    /// Panics if the future has already been run, and re-raises a panic from
    /// the callable after poisoning the future.
    pub fn run(&self, _ctx: &dyn TaskContext) {
        let producer = self.producer.lock().take();
        let Some(producer) = producer else {
            panic!("TaskFuture executed more than once");
        };

        let poison = PoisonOnUnwind { future: self };
        let value = producer();
        std::mem::forget(poison);

        // SAFETY: only the thread that took `producer` gets here, once.
        unsafe { (*self.value.get()).write(value) };
        self.publish(READY);
    }

    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// The result if it has been published, without waiting.
    pub fn try_result(&self) -> Option<&T> {
        if self.is_ready() {
            // SAFETY: READY is only stored after the value was written.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Waits until the result has been published and returns it.
    ///
    /// # Panics
    ///
    /// Panics if the callable panicked.
    pub fn result(&self) -> &T {
        let state = match self.strategy {
            WaitStrategy::Spin => self.wait_spinning(),
            WaitStrategy::Park => self.wait_parked(),
        };
        assert!(state != POISONED, "TaskFuture producer panicked");
        // SAFETY: see `try_result`.
        unsafe { (*self.value.get()).assume_init_ref() }
    }

    /// Takes the published result out of the future, or `None` if it has not
    /// been produced.
    pub fn into_result(mut self) -> Option<T> {
        if *self.state.get_mut() != READY {
            return None;
        }
        *self.state.get_mut() = PENDING;
        // SAFETY: READY means initialized; resetting the state keeps `Drop`
        // from dropping the value a second time.
        Some(unsafe { self.value.get_mut().assume_init_read() })
    }

    fn wait_spinning(&self) -> u8 {
        let backoff = Backoff::new();
        loop {
            let state = self.state.load(Ordering::Acquire);
            if state != PENDING {
                return state;
            }
            backoff.snooze();
        }
    }

    fn wait_parked(&self) -> u8 {
        let mut guard = self.lock.lock();
        loop {
            let state = self.state.load(Ordering::Acquire);
            if state != PENDING {
                return state;
            }
            self.published.wait(&mut guard);
        }
    }

    fn publish(&self, state: u8) {
        self.state.store(state, Ordering::Release);
        // a parked waiter checks `state` under `lock`, so taking it here means
        // the notification cannot slip in between its check and its wait
        let _guard = self.lock.lock();
        self.published.notify_all();
    }
}

impl<T: Send + Sync> Task for TaskFuture<T> {
    fn run(&self, ctx: &dyn TaskContext) {
        TaskFuture::run(self, ctx)
    }
}

impl<T> Drop for TaskFuture<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // SAFETY: READY means initialized, and nothing reads it past drop.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

impl<T> fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Acquire) {
            PENDING => "pending",
            READY => "ready",
            _ => "poisoned",
        };
        f.debug_struct("TaskFuture")
            .field("state", &state)
            .field("strategy", &self.strategy)
            .finish()
    }
}

struct PoisonOnUnwind<'a, T> {
    future: &'a TaskFuture<T>,
}

impl<T> Drop for PoisonOnUnwind<'_, T> {
    fn drop(&mut self) {
        self.future.publish(POISONED);
    }
}

/// Queues `f` on `manager` and returns the future its result lands in.
pub fn spawn_future<M, T, F>(manager: &M, f: F, priority: TaskPriority) -> Arc<TaskFuture<T>>
where
    M: TaskManager + ?Sized,
    T: Send + Sync + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let future = Arc::new(TaskFuture::with_strategy(f, manager.wait_strategy()));
    let task = future.clone();
    manager.run(Box::new(move |ctx: &dyn TaskContext| task.run(ctx)), priority);
    future
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::InlineTaskManager;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    struct NoContext;

    impl TaskContext for NoContext {
        fn fiber(&self) -> Option<crate::fiber::FiberId> {
            None
        }
    }

    #[test]
    fn test_run_then_result() {
        let future = TaskFuture::new(|| 6 * 7);
        assert!(!future.is_ready());
        assert_eq!(future.try_result(), None);

        future.run(&NoContext);
        assert!(future.is_ready());
        assert_eq!(*future.result(), 42);
        assert_eq!(future.try_result(), Some(&42));
        assert_eq!(future.into_result(), Some(42));
    }

    #[test]
    #[should_panic(expected = "more than once")]
    fn test_double_run_panics() {
        let future = TaskFuture::new(|| ());
        future.run(&NoContext);
        future.run(&NoContext);
    }

    #[test]
    fn test_into_result_before_run() {
        let future = TaskFuture::new(|| String::from("never"));
        assert_eq!(future.into_result(), None);
    }

    #[test]
    fn test_concurrent_readers_see_one_value() {
        for strategy in [WaitStrategy::Spin, WaitStrategy::Park] {
            let runs = Arc::new(AtomicUsize::new(0));
            let counter = runs.clone();
            let future = Arc::new(TaskFuture::with_strategy(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    vec![1u64, 2, 3]
                },
                strategy,
            ));

            let readers: Vec<_> = (0..8)
                .map(|_| {
                    let future = future.clone();
                    thread::spawn(move || future.result().iter().sum::<u64>())
                })
                .collect();

            thread::sleep(Duration::from_millis(20));
            future.run(&NoContext);

            for reader in readers {
                assert_eq!(reader.join().unwrap(), 6);
            }
            assert_eq!(runs.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_panicking_producer_poisons() {
        let future = Arc::new(TaskFuture::with_strategy(
            || -> u32 { panic!("boom") },
            WaitStrategy::Park,
        ));

        let waiter = {
            let future = future.clone();
            thread::spawn(move || *future.result())
        };

        let ran = catch_unwind(AssertUnwindSafe(|| future.run(&NoContext)));
        assert!(ran.is_err());
        assert!(!future.is_ready());
        assert!(waiter.join().is_err());
    }

    #[test]
    fn test_drop_releases_value() {
        let payload = Arc::new(());
        let held = payload.clone();
        let future = TaskFuture::new(move || held);
        future.run(&NoContext);
        assert_eq!(Arc::strong_count(&payload), 2);
        drop(future);
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn test_spawn_future_inline() {
        let manager = InlineTaskManager::new();
        let future = spawn_future(&manager, || "done", TaskPriority::High);
        assert!(future.is_ready());
        assert_eq!(*future.result(), "done");
    }
}
