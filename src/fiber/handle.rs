//! Handles and per-fiber bookkeeping types.

use std::fmt;

/// Copyable, non-owning name of a fiber slot. Useful for logging and for
/// querying [`FiberPool::state`](super::FiberPool::state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(pub(crate) u32);

impl FiberId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber#{}", self.0)
    }
}

/// Ownership token for an in-use fiber that is not currently running.
///
/// Handles are move-only: releasing or resuming a fiber consumes its handle,
/// so the same fiber cannot be released twice or resumed by two holders.
/// Dropping a handle without handing it back leaks the fiber slot.
#[must_use = "dropping a FiberHandle leaks the fiber; release or resume it"]
pub struct FiberHandle {
    pub(crate) pool_id: u32,
    pub(crate) index: u32,
}

impl FiberHandle {
    pub(crate) fn new(pool_id: u32, index: u32) -> Self {
        Self { pool_id, index }
    }

    pub fn id(&self) -> FiberId {
        FiberId(self.index)
    }
}

impl fmt::Debug for FiberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("pool", &self.pool_id)
            .field("index", &self.index)
            .finish()
    }
}

/// Where a fiber is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Free for `acquire_fiber`.
    Available,
    /// Acquired and not hibernated: either executing or about to be resumed.
    Running,
    /// Yielded without releasing itself; waiting for its handle holder.
    Hibernated,
}

/// Callback handed the handle of a fiber that just hibernated.
pub type ParkFn = Box<dyn FnOnce(FiberHandle) + Send + 'static>;

/// How the running fiber gives up the thread.
pub enum YieldMode {
    /// Return the yielding fiber to the pool as soon as the target runs.
    Release,
    /// Keep the yielding fiber in use; `park` receives its handle on the
    /// target fiber once the switch has completed.
    Hibernate(ParkFn),
}

impl fmt::Debug for YieldMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YieldMode::Release => f.write_str("Release"),
            YieldMode::Hibernate(_) => f.write_str("Hibernate(..)"),
        }
    }
}

/// One-shot action a fiber performs as soon as it gains control.
#[derive(Default)]
pub(crate) enum WakeAction {
    #[default]
    None,
    Release(u32),
    Park { fiber: FiberHandle, park: ParkFn },
}

impl WakeAction {
    pub(crate) fn is_none(&self) -> bool {
        matches!(self, WakeAction::None)
    }
}

impl fmt::Debug for WakeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WakeAction::None => f.write_str("None"),
            WakeAction::Release(index) => f.debug_tuple("Release").field(index).finish(),
            WakeAction::Park { fiber, .. } => {
                f.debug_struct("Park").field("fiber", fiber).finish_non_exhaustive()
            }
        }
    }
}
