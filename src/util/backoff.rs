//! Exponential backoff for busy-wait loops.

use std::cell::Cell;
use std::hint::spin_loop;

/// Exponential backoff for spin loops.
///
/// Only ever issues CPU pause hints: the thread keeps its core, and the number
/// of hints per call doubles until it reaches a fixed ceiling.
#[derive(Debug, Default)]
pub struct Backoff {
    step: Cell<u32>,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;

    pub fn new() -> Self {
        Self { step: Cell::new(0) }
    }

    pub fn reset(&self) {
        self.step.set(0);
    }

    /// Spins for `2^step` pause hints, capped at `2^SPIN_LIMIT`.
    pub fn snooze(&self) {
        let step = self.step.get();
        for _ in 0..(1u32 << step) {
            spin_loop();
        }
        if step < Self::SPIN_LIMIT {
            self.step.set(step + 1);
        }
    }

    /// True once `snooze` has reached its longest spin.
    pub fn is_completed(&self) -> bool {
        self.step.get() >= Self::SPIN_LIMIT
    }
}
