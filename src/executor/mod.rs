//! Reference task manager built on the fiber pool and the priority queue.

mod fiber_executor;
mod panic_handler;
mod wait_group;
mod worker;

pub use fiber_executor::FiberExecutor;
pub use panic_handler::{PanicHandler, PanicInfo, PanicStrategy};
