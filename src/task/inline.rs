use super::{BoxedTask, Task, TaskContext, TaskManager, TaskPriority};
use crate::fiber::FiberId;

/// Runs every task immediately on the calling thread.
///
/// Priorities are ignored. Useful in tests and for callers that want the
/// task APIs without a thread pool behind them.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineTaskManager {
    _private: (),
}

impl InlineTaskManager {
    pub fn new() -> Self {
        Self::default()
    }
}

struct InlineContext;

impl TaskContext for InlineContext {
    fn fiber(&self) -> Option<FiberId> {
        None
    }
}

impl TaskManager for InlineTaskManager {
    fn run(&self, task: BoxedTask, _priority: TaskPriority) {
        task(&InlineContext);
    }

    fn run_and_wait_for(&self, tasks: &[&dyn Task], _priority: TaskPriority) {
        for task in tasks {
            task.run(&InlineContext);
        }
    }
}
