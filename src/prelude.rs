pub use crate::config::{Config, ConfigBuilder, WaitStrategy};
pub use crate::error::{Error, Result};
pub use crate::executor::{FiberExecutor, PanicStrategy};
pub use crate::fiber::{CurrentFiber, FiberHandle, FiberId, FiberPool, FiberState, YieldMode};
pub use crate::queue::{BoundedQueue, PriorityQueue};
pub use crate::task::{
    parallel_for, parallel_for_range, spawn, spawn_future, BoxedTask, InlineTaskManager, Task,
    TaskContext, TaskFuture, TaskManager, TaskPriority,
};
