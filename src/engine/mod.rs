//! Event-to-step analysis engine
//!
//! This module provides the single pass that turns raw events into steps:
//! - [`assembler`]: the [`TraceAssembler`] state machine and step emission
//! - [`classify`]: per-event-kind handlers (`impl TraceAssembler`)
//! - [`loops`]: loop iteration counters
//! - [`heap`]: heap block bookkeeping
//! - [`errors`]: error and diagnostic types
//!
//! # Execution Model
//!
//! One [`TraceAssembler`] handles one session. It owns every piece of mutable
//! state it uses (frames, scopes, aliases, loop counters, heap blocks), so
//! independent sessions can run on separate threads without sharing
//! anything. The pass is synchronous and deterministic: the same input always
//! produces the same steps, in the same order, with the same indices.

pub mod assembler;
pub mod classify;
pub mod constants;
pub mod errors;
pub mod heap;
pub mod loops;

pub use assembler::{AssemblerState, TraceAssembler};

use crate::trace::{TraceInput, TraceResult};
use constants::DEFAULT_ENTRY_POINT;

/// Engine settings for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Function whose first entry starts the program
    pub entry_point: String,
    /// Also turn captured stderr into output steps
    pub capture_stderr: bool,
    /// Record declarations seen before the entry point as globals
    pub record_globals: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            capture_stderr: true,
            record_globals: true,
        }
    }
}

/// Run one pass with the default configuration
pub fn assemble(input: &TraceInput) -> TraceResult {
    TraceAssembler::new(EngineConfig::default()).run(input)
}
