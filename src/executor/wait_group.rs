use crate::fiber::FiberHandle;
use crate::queue::BoundedQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct WaitState {
    finished: bool,
    waiter: Option<FiberHandle>,
}

/// Completion barrier for one `run_and_wait_for` call.
///
/// A thread waiter blocks on the condition variable. A fiber waiter adds one
/// to the count, hibernates, and drops that extra count from its park
/// callback once its handle is stored, so whoever takes the count to zero is
/// guaranteed to find the handle and push it on the ready list.
#[derive(Debug)]
pub(crate) struct WaitGroup {
    pending: AtomicUsize,
    state: Mutex<WaitState>,
    done: Condvar,
}

impl WaitGroup {
    pub(crate) fn new(pending: usize) -> Self {
        Self {
            pending: AtomicUsize::new(pending),
            state: Mutex::new(WaitState::default()),
            done: Condvar::new(),
        }
    }

    /// Park callback of a hibernating fiber waiter.
    pub(crate) fn park(&self, fiber: FiberHandle, ready: &BoundedQueue<FiberHandle>) {
        let previous = self.state.lock().waiter.replace(fiber);
        debug_assert!(previous.is_none(), "wait group parked twice");
        self.task_done(ready);
    }

    pub(crate) fn task_done(&self, ready: &BoundedQueue<FiberHandle>) {
        let previous = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "wait group count underflow");
        if previous == 1 {
            self.complete(ready);
        }
    }

    /// Blocks the calling thread until every task has called `task_done`.
    pub(crate) fn wait(&self) {
        let mut state = self.state.lock();
        while !state.finished {
            self.done.wait(&mut state);
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    fn complete(&self, ready: &BoundedQueue<FiberHandle>) {
        let mut state = self.state.lock();
        state.finished = true;
        let waiter = state.waiter.take();
        self.done.notify_all();
        drop(state);

        if let Some(fiber) = waiter {
            ready.produce(fiber);
        }
    }
}
