//! Stackful fibers.
//!
//! A [`FiberPool`] owns a fixed number of fibers, each with its own stack
//! reserved up front. Worker threads enter the pool with
//! [`FiberPool::start_thread`]; from then on the running fiber decides which
//! fiber the thread runs next through [`CurrentFiber::yield_to`].
//!
//! Every fiber is in exactly one [`FiberState`]:
//!
//! ```text
//!            acquire               yield(Hibernate)
//! Available ---------> Running -------------------> Hibernated
//!     ^                 |   ^                            |
//!     |                 |   +---- resumed by holder -----+
//!     +-----------------+
//!   yield(Release) or release_fiber
//! ```
//!
//! Misuse (exhaustion, double release, releasing a fiber with a pending wake
//! action) is a programming error and panics.

mod bitset;
mod context;
mod handle;
mod pool;

pub use handle::{FiberHandle, FiberId, FiberState, ParkFn, YieldMode};
pub use pool::{CurrentFiber, EntryFn, FiberPool};
