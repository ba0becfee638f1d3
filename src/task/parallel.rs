//! Fork-join over a collection of items.

use super::{Task, TaskContext, TaskManager, TaskPriority};
use parking_lot::Mutex;
use std::ops::Range;

/// One item of a `parallel_for_range` call, borrowed by the manager until the
/// call returns.
struct RangeTask<'a, T, F> {
    item: Mutex<Option<T>>,
    body: &'a F,
}

impl<T, F> Task for RangeTask<'_, T, F>
where
    T: Send,
    F: Fn(T) + Sync,
{
    fn run(&self, _ctx: &dyn TaskContext) {
        let item = self.item.lock().take();
        if let Some(item) = item {
            (self.body)(item);
        }
    }
}

/// Calls `f` once per item, spreading the calls over `manager`, and returns
/// when all of them have finished.
///
/// No items is a no-op and a single item runs inline on the caller; neither
/// case touches `manager`. A panic in `f` is handled by the manager.
pub fn parallel_for_range<M, I, F>(manager: &M, items: I, f: F, priority: TaskPriority)
where
    M: TaskManager + ?Sized,
    I: IntoIterator,
    I::IntoIter: ExactSizeIterator,
    I::Item: Send,
    F: Fn(I::Item) + Sync,
{
    let mut items = items.into_iter();
    match items.len() {
        0 => {}
        1 => {
            if let Some(item) = items.next() {
                f(item);
            }
        }
        count => {
            let tasks: Vec<RangeTask<'_, I::Item, F>> = items
                .map(|item| RangeTask {
                    item: Mutex::new(Some(item)),
                    body: &f,
                })
                .collect();
            debug_assert_eq!(tasks.len(), count);

            let refs: Vec<&dyn Task> = tasks.iter().map(|task| task as &dyn Task).collect();
            manager.run_and_wait_for(&refs, priority);
        }
    }
}

/// [`parallel_for_range`] over the indices in `range`.
pub fn parallel_for<M, F>(manager: &M, range: Range<usize>, f: F, priority: TaskPriority)
where
    M: TaskManager + ?Sized,
    F: Fn(usize) + Sync,
{
    parallel_for_range(manager, range, f, priority);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{BoxedTask, InlineTaskManager};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and forwards to an inline manager.
    #[derive(Default)]
    struct CountingManager {
        runs: AtomicUsize,
        waits: AtomicUsize,
        inner: InlineTaskManager,
    }

    impl TaskManager for CountingManager {
        fn run(&self, task: BoxedTask, priority: TaskPriority) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.inner.run(task, priority);
        }

        fn run_and_wait_for(&self, tasks: &[&dyn Task], priority: TaskPriority) {
            self.waits.fetch_add(1, Ordering::SeqCst);
            self.inner.run_and_wait_for(tasks, priority);
        }
    }

    #[test]
    fn test_empty_range_is_noop() {
        let manager = CountingManager::default();
        let calls = AtomicUsize::new(0);

        parallel_for_range(
            &manager,
            Vec::<u32>::new(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            },
            TaskPriority::Normal,
        );

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.waits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_single_item_runs_inline() {
        let manager = CountingManager::default();
        let seen = Mutex::new(Vec::new());

        parallel_for_range(&manager, vec!["only"], |item| seen.lock().push(item), TaskPriority::High);

        assert_eq!(*seen.lock(), vec!["only"]);
        assert_eq!(manager.waits.load(Ordering::SeqCst), 0);
        assert_eq!(manager.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_many_items_fork_join_once() {
        let manager = CountingManager::default();
        let sum = AtomicUsize::new(0);

        parallel_for(
            &manager,
            0..100,
            |i| {
                sum.fetch_add(i, Ordering::SeqCst);
            },
            TaskPriority::Normal,
        );

        assert_eq!(sum.load(Ordering::SeqCst), 4950);
        assert_eq!(manager.waits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_items_are_moved_into_body() {
        let manager = InlineTaskManager::new();
        let total = Mutex::new(String::new());
        let words = vec![String::from("a"), String::from("b"), String::from("c")];

        parallel_for_range(&manager, words, |word| total.lock().push_str(&word), TaskPriority::Low);

        assert_eq!(total.lock().len(), 3);
    }
}
