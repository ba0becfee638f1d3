//! The one place that touches stack switching.
//!
//! Every fiber is a `corosensei` coroutine that only ever suspends back to the
//! dispatcher running on the OS thread's native stack. A switch from fiber A
//! to fiber B is A suspending with [`Transfer::To`] followed by the dispatcher
//! resuming B, so fibers never nest inside each other.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::convert::Infallible;
use std::io;

/// What a fiber asks its dispatcher to do when it suspends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transfer {
    /// Resume the fiber in this slot next.
    To(u32),
    /// Return from `start_thread` and release the suspending fiber.
    Exit,
}

/// Handle a running fiber uses to suspend itself.
pub(crate) type Suspender<I> = Yielder<I, Transfer>;

pub(crate) struct FiberContext<I: 'static> {
    coroutine: Coroutine<I, Transfer, Infallible, DefaultStack>,
}

impl<I: 'static> FiberContext<I> {
    /// Reserves a stack of `stack_size` bytes and prepares `body` to run on it
    /// the first time the context is resumed.
    pub(crate) fn new<F>(stack_size: usize, body: F) -> io::Result<Self>
    where
        F: FnOnce(&Suspender<I>, I) -> Infallible + 'static,
    {
        let stack = DefaultStack::new(stack_size)?;
        Ok(Self {
            coroutine: Coroutine::with_stack(stack, body),
        })
    }

    /// Switches from the native stack into this context until it suspends.
    ///
    /// Panics raised inside the context propagate out of this call.
    pub(crate) fn resume(&mut self, input: I) -> Transfer {
        match self.coroutine.resume(input) {
            CoroutineResult::Yield(transfer) => transfer,
            CoroutineResult::Return(never) => match never {},
        }
    }

    pub(crate) fn started(&self) -> bool {
        self.coroutine.started()
    }
}

/// Switches from the running context back to its dispatcher.
pub(crate) fn switch_out<I: 'static>(suspender: &Suspender<I>, transfer: Transfer) -> I {
    suspender.suspend(transfer)
}
