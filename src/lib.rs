//! # Introduction
//!
//! steptrace turns the raw event log of an instrumented C/C++ run into an
//! ordered list of semantic steps for step-by-step replay.  It reconstructs
//! call frames, nested lexical scopes, loop iterations and pointer aliases
//! from the events alone, and stamps every step with the frame and scope it
//! happened in.
//!
//! ## Analysis pipeline
//!
//! ```text
//! Trace JSON → Loader → RawEvents → Assembler (Classifier) → Steps → TraceResult
//! ```
//!
//! 1. [`event`]: raw events, typed values, and the loader for the tracer's
//!    JSON document ([`event::wire`]).
//! 2. [`frame`]: the reconstructed call stack: [`frame::FrameStack`],
//!    per-frame [`frame::scope`]s and [`frame::alias`] tables.
//! 3. [`engine`]: the [`engine::TraceAssembler`] state machine and the
//!    per-kind classifier, plus loop counters and heap bookkeeping.
//! 4. [`step`]: the [`step::SemanticStep`] model and the output segmenter.
//! 5. [`trace`]: pass input and the final [`trace::TraceResult`].
//!
//! ## Guarantees
//!
//! Every `func_enter` step has a matching `func_exit`, every declared symbol
//! appears in exactly one `scope_exit`, loop iterations count from 1 and
//! increase by one, and a resolved pointer target is never the pointer
//! itself.  The pass never fails: degraded input is recorded in
//! [`engine::errors::Diagnostics`] instead.
//!
//! ```
//! use steptrace::engine::assemble;
//! use steptrace::event::{EventKind, RawEvent};
//! use steptrace::trace::TraceInput;
//!
//! let events = vec![
//!     RawEvent::new(EventKind::FuncEnter { name: "main".into() }),
//!     RawEvent::new(EventKind::FuncExit { name: "main".into() }),
//! ];
//! let result = assemble(&TraceInput::new(events));
//! assert_eq!(result.len(), 3);
//! ```

pub mod engine;
pub mod event;
pub mod frame;
pub mod step;
pub mod trace;

pub use engine::{assemble, EngineConfig, TraceAssembler};
pub use event::{EventKind, RawEvent};
pub use step::{SemanticStep, StepKind};
pub use trace::{TraceInput, TraceResult};
