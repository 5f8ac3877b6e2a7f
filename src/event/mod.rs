//! Raw instrumentation events
//!
//! This module defines the input side of the engine:
//! - [`value`]: typed values carried by events
//! - [`wire`]: loading the tracer's JSON document into [`RawEvent`]s
//!
//! A [`RawEvent`] is immutable once built. Its [`EventKind`] is a closed
//! tagged union; the classifier matches it exhaustively, so adding a kind
//! is a compile-time change rather than a silent misclassification.

pub mod value;
pub mod wire;

use crate::engine::errors::TraceError;
use serde::Serialize;
pub use value::{Address, Value};

/// Source location reported by the instrumentation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: Some(file.into()),
            line,
        }
    }

    /// Location with a line but no file
    pub fn at_line(line: u32) -> Self {
        Self { file: None, line }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

/// One event emitted by the instrumented binary
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Emission ordinal assigned by the tracer
    pub id: u64,
    pub location: SourceLocation,
    /// Function the tracer believed was executing, if reported
    pub function: Option<String>,
    /// Raw `addr` reported with the record (a code or data address)
    pub address: Option<Address>,
    pub kind: EventKind,
}

impl RawEvent {
    pub fn new(kind: EventKind) -> Self {
        RawEvent {
            id: 0,
            location: SourceLocation::unknown(),
            function: None,
            address: None,
            kind,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = location;
        self
    }

    /// Check that the fields required by this event's kind are present.
    ///
    /// Names are the only fields that can be structurally present but
    /// unusable, so this rejects empty symbol, pointer and function names.
    pub fn validate(&self) -> Result<(), TraceError> {
        let missing = match &self.kind {
            EventKind::FuncEnter { name } | EventKind::FuncExit { name } if name.is_empty() => {
                Some("function name")
            }
            EventKind::Declare { name, .. }
            | EventKind::Assign { name, .. }
            | EventKind::VarTrace { name, .. }
            | EventKind::ArrayCreate { name, .. }
            | EventKind::ArrayInit { name, .. }
            | EventKind::ArrayIndexAssign { name, .. }
                if name.is_empty() =>
            {
                Some("symbol name")
            }
            EventKind::PointerAlias { pointer, .. }
            | EventKind::PointerHeapInit { pointer, .. }
            | EventKind::PointerDerefWrite { pointer, .. }
                if pointer.is_empty() =>
            {
                Some("pointer name")
            }
            EventKind::ArrayIndexAssign { indices, .. } if indices.is_empty() => Some("indices"),
            _ => None,
        };

        match missing {
            Some(field) => Err(TraceError::MalformedEvent {
                id: self.id,
                kind: self.kind.name().to_string(),
                field,
            }),
            None => Ok(()),
        }
    }
}

/// Kind-specific payload of a raw event
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    FuncEnter {
        name: String,
    },
    FuncExit {
        name: String,
    },
    Declare {
        name: String,
        var_type: Option<String>,
        address: Option<Address>,
    },
    Assign {
        name: String,
        value: Value,
    },
    /// Value probe from the `TRACE_*` macros
    VarTrace {
        name: String,
        value: Value,
        var_type: Option<String>,
    },
    ArrayCreate {
        name: String,
        base_type: Option<String>,
        dimensions: Vec<usize>,
        is_stack: bool,
        address: Option<Address>,
    },
    ArrayInit {
        name: String,
        values: Vec<Value>,
    },
    ArrayIndexAssign {
        name: String,
        indices: Vec<usize>,
        value: Value,
    },
    PointerAlias {
        pointer: String,
        /// Symbol name when the instrumenter could name the target
        target: Option<String>,
        address: Option<Address>,
        decayed_from_array: bool,
    },
    PointerHeapInit {
        pointer: String,
        address: Option<Address>,
    },
    PointerDerefWrite {
        pointer: String,
        value: Value,
    },
    HeapAlloc {
        address: Address,
        size: u64,
    },
    HeapFree {
        address: Address,
    },
    HeapWrite {
        address: Address,
        value: Value,
    },
    LoopStart {
        loop_id: u32,
        loop_type: Option<String>,
    },
    LoopCondition {
        loop_id: u32,
        result: bool,
    },
    LoopBodyStart {
        loop_id: u32,
    },
    LoopIterationEnd {
        loop_id: u32,
    },
    LoopEnd {
        loop_id: u32,
    },
    ControlFlow {
        control_type: String,
    },
    BlockEnter {
        depth: Option<u32>,
    },
    BlockExit {
        depth: Option<u32>,
    },
    Return {
        value: Value,
        return_type: Option<String>,
        destination: Option<String>,
    },
    /// A kind this engine does not know; produces no step
    Unrecognized {
        kind: String,
    },
}

impl EventKind {
    /// Wire name of this kind
    pub fn name(&self) -> &str {
        match self {
            EventKind::FuncEnter { .. } => "func_enter",
            EventKind::FuncExit { .. } => "func_exit",
            EventKind::Declare { .. } => "declare",
            EventKind::Assign { .. } => "assign",
            EventKind::VarTrace { .. } => "var",
            EventKind::ArrayCreate { .. } => "array_create",
            EventKind::ArrayInit { .. } => "array_init",
            EventKind::ArrayIndexAssign { .. } => "array_index_assign",
            EventKind::PointerAlias { .. } => "pointer_alias",
            EventKind::PointerHeapInit { .. } => "pointer_heap_init",
            EventKind::PointerDerefWrite { .. } => "pointer_deref_write",
            EventKind::HeapAlloc { .. } => "heap_alloc",
            EventKind::HeapFree { .. } => "heap_free",
            EventKind::HeapWrite { .. } => "heap_write",
            EventKind::LoopStart { .. } => "loop_start",
            EventKind::LoopCondition { .. } => "loop_condition",
            EventKind::LoopBodyStart { .. } => "loop_body_start",
            EventKind::LoopIterationEnd { .. } => "loop_iteration_end",
            EventKind::LoopEnd { .. } => "loop_end",
            EventKind::ControlFlow { .. } => "control_flow",
            EventKind::BlockEnter { .. } => "block_enter",
            EventKind::BlockExit { .. } => "block_exit",
            EventKind::Return { .. } => "return",
            EventKind::Unrecognized { kind } => kind,
        }
    }
}

/// Strip a demangled parameter list: `add(int, int)` becomes `add`.
pub fn normalize_function_name(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.find('(') {
        Some(0) | None => trimmed,
        Some(pos) => trimmed[..pos].trim_end(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_function_name() {
        assert_eq!(normalize_function_name("add(int, int)"), "add");
        assert_eq!(normalize_function_name("main"), "main");
        assert_eq!(normalize_function_name("  helper "), "helper");
        assert_eq!(normalize_function_name("(anonymous)"), "(anonymous)");
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        let event = RawEvent::new(EventKind::Declare {
            name: String::new(),
            var_type: Some("int".to_string()),
            address: None,
        })
        .with_id(7);

        match event.validate() {
            Err(TraceError::MalformedEvent { id, kind, field }) => {
                assert_eq!(id, 7);
                assert_eq!(kind, "declare");
                assert_eq!(field, "symbol name");
            }
            other => panic!("Expected malformed event, got {:?}", other),
        }

        let ok = RawEvent::new(EventKind::LoopEnd { loop_id: 3 });
        assert!(ok.validate().is_ok());
    }
}
