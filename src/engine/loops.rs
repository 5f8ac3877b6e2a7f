//! Loop iteration counting
//!
//! Loop identifiers are assigned at instrumentation time and are unique per
//! static loop site, so a plain map keyed by identifier is enough: nested
//! loops have distinct ids and therefore distinct counters. The counter is
//! removed on `loop_end`, which lets the same site run again later (a second
//! call of the enclosing function) starting from iteration 1.

use rustc_hash::FxHashMap;

/// Per-loop iteration counters for one session
#[derive(Debug, Clone, Default)]
pub struct LoopCounter {
    iterations: FxHashMap<u32, u32>,
}

impl LoopCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A loop is about to run; any stale count for `loop_id` is discarded
    pub fn on_loop_start(&mut self, loop_id: u32) {
        self.iterations.insert(loop_id, 0);
    }

    /// A new iteration body starts; returns its 1-based number.
    ///
    /// A body without a preceding `loop_start` counts from 1 as well.
    pub fn on_body_start(&mut self, loop_id: u32) -> u32 {
        let count = self.iterations.entry(loop_id).or_insert(0);
        *count += 1;
        *count
    }

    /// Iterations started so far for `loop_id` (0 if it is not running)
    pub fn current(&self, loop_id: u32) -> u32 {
        self.iterations.get(&loop_id).copied().unwrap_or(0)
    }

    /// The loop finished; returns how many iterations it ran and resets it
    pub fn on_loop_end(&mut self, loop_id: u32) -> u32 {
        self.iterations.remove(&loop_id).unwrap_or(0)
    }

    /// Number of loops currently running
    pub fn active(&self) -> usize {
        self.iterations.len()
    }
}
