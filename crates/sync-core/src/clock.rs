//! Logical (Lamport) clock shared by the walker and the file sets.
//!
//! Passed around explicitly as an `Arc<LogicalClock>` rather than living as
//! a process-wide singleton, so tests can run with isolated clocks.

use std::sync::Mutex;

/// A monotonic counter that can be ticked past an observed external value.
///
/// Every tick returns a value strictly greater than all previous ticks and
/// all observed inputs, so versions assigned through the clock never repeat
/// or regress.
#[derive(Debug, Default)]
pub struct LogicalClock {
    value: Mutex<u64>,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance past `observed` and return the new value.
    pub fn tick(&self, observed: u64) -> u64 {
        let mut value = self.value.lock().unwrap();
        *value = (*value).max(observed) + 1;
        *value
    }
}
