pub mod backoff;
pub mod cache_padded;
pub mod spinlock;

pub use backoff::Backoff;
pub use cache_padded::CachePadded;
pub use spinlock::{SpinLock, SpinLockGuard};
