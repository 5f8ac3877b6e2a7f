//! Semantic steps
//!
//! A [`SemanticStep`] is the unit of output: one replayable moment of the
//! traced program, stamped with the frame and scope it happened in. Steps are
//! append-only; once emitted they are never changed.
//!
//! The human-readable [`SemanticStep::explanation`] is computed from the
//! step's own fields, so re-rendering a stored step always gives the same
//! text.

pub mod output;

use crate::event::value::{serialize_address, serialize_opt_address};
use crate::event::{Address, SourceLocation, Value};
use crate::frame::scope::ScopeKind;
use crate::frame::FrameMetadata;
use output::OutputStream;
use serde::Serialize;

/// Scope a step was emitted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeTag {
    Global,
    Function,
    Block,
    LoopIteration,
}

impl From<ScopeKind> for ScopeTag {
    fn from(kind: ScopeKind) -> Self {
        match kind {
            ScopeKind::Function => ScopeTag::Function,
            ScopeKind::Block => ScopeTag::Block,
            ScopeKind::LoopIteration => ScopeTag::LoopIteration,
        }
    }
}

/// One step of the replayable trace
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticStep {
    pub index: usize,
    pub location: SourceLocation,
    #[serde(flatten)]
    pub frame: FrameMetadata,
    pub scope: ScopeTag,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// Kind-specific payload, tagged with the step's event type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "eventType",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum StepKind {
    ProgramStart {
        entry: String,
    },
    FuncEnter {
        callee: String,
    },
    FuncExit {
        callee: String,
    },
    VarDeclare {
        name: String,
        var_type: Option<String>,
        #[serde(serialize_with = "serialize_opt_address")]
        address: Option<Address>,
    },
    VarAssign {
        name: String,
        value: Value,
        /// Pointer the write went through, for companion steps of a deref write
        via_pointer: Option<String>,
        /// Frame that declared the symbol, when one does
        owner_frame_id: Option<String>,
    },
    ArrayCreate {
        name: String,
        base_type: Option<String>,
        dimensions: Vec<usize>,
        is_stack: bool,
        #[serde(serialize_with = "serialize_opt_address")]
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
        name: String,
        target_name: Option<String>,
        is_heap: bool,
        #[serde(serialize_with = "serialize_opt_address")]
        heap_address: Option<Address>,
        decayed_from_array: bool,
    },
    PointerDerefWrite {
        name: String,
        value: Value,
        /// `None` when the target could not be resolved
        target_name: Option<String>,
        is_heap: bool,
        #[serde(serialize_with = "serialize_opt_address")]
        heap_address: Option<Address>,
        target_frame_id: Option<String>,
    },
    HeapAlloc {
        #[serde(serialize_with = "serialize_address")]
        address: Address,
        size: u64,
    },
    HeapFree {
        #[serde(serialize_with = "serialize_address")]
        address: Address,
        size: Option<u64>,
        /// The block was allocated under tracing
        known: bool,
        double_free: bool,
    },
    HeapWrite {
        #[serde(serialize_with = "serialize_address")]
        address: Address,
        value: Value,
        #[serde(serialize_with = "serialize_opt_address")]
        block_address: Option<Address>,
        offset: Option<u64>,
    },
    LoopStart {
        loop_id: u32,
        loop_type: Option<String>,
    },
    LoopCondition {
        loop_id: u32,
        result: bool,
        /// Iterations started before this check
        iteration: u32,
    },
    LoopBodyStart {
        loop_id: u32,
        iteration: u32,
    },
    LoopIterationEnd {
        loop_id: u32,
        iteration: u32,
    },
    LoopEnd {
        loop_id: u32,
        total_iterations: u32,
    },
    ControlFlow {
        control_type: String,
    },
    BlockEnter {
        block_depth: Option<u32>,
    },
    BlockExit {
        block_depth: Option<u32>,
    },
    Return {
        value: Value,
        return_type: Option<String>,
        destination: Option<String>,
    },
    ScopeExit {
        /// Every symbol destroyed, innermost scope first
        destroyed: Vec<String>,
        /// Kind of the outermost scope that closed
        scope_kind: ScopeKind,
        loop_id: Option<u32>,
        iteration: Option<u32>,
    },
    Output {
        text: String,
        raw: String,
        escapes: Vec<String>,
        stream: OutputStream,
    },
    ProgramEnd {
        dangling_frames: usize,
    },
}

impl StepKind {
    /// The event-type tag, as serialized
    pub fn tag(&self) -> &'static str {
        match self {
            StepKind::ProgramStart { .. } => "program_start",
            StepKind::FuncEnter { .. } => "func_enter",
            StepKind::FuncExit { .. } => "func_exit",
            StepKind::VarDeclare { .. } => "var_declare",
            StepKind::VarAssign { .. } => "var_assign",
            StepKind::ArrayCreate { .. } => "array_create",
            StepKind::ArrayInit { .. } => "array_init",
            StepKind::ArrayIndexAssign { .. } => "array_index_assign",
            StepKind::PointerAlias { .. } => "pointer_alias",
            StepKind::PointerDerefWrite { .. } => "pointer_deref_write",
            StepKind::HeapAlloc { .. } => "heap_alloc",
            StepKind::HeapFree { .. } => "heap_free",
            StepKind::HeapWrite { .. } => "heap_write",
            StepKind::LoopStart { .. } => "loop_start",
            StepKind::LoopCondition { .. } => "loop_condition",
            StepKind::LoopBodyStart { .. } => "loop_body_start",
            StepKind::LoopIterationEnd { .. } => "loop_iteration_end",
            StepKind::LoopEnd { .. } => "loop_end",
            StepKind::ControlFlow { .. } => "control_flow",
            StepKind::BlockEnter { .. } => "block_enter",
            StepKind::BlockExit { .. } => "block_exit",
            StepKind::Return { .. } => "return",
            StepKind::ScopeExit { .. } => "scope_exit",
            StepKind::Output { .. } => "output",
            StepKind::ProgramEnd { .. } => "program_end",
        }
    }
}

impl SemanticStep {
    pub fn tag(&self) -> &'static str {
        self.kind.tag()
    }

    /// Human-readable description derived only from this step's fields
    pub fn explanation(&self) -> String {
        let function = &self.frame.function;
        match &self.kind {
            StepKind::ProgramStart { entry } => format!("Program starts in {}()", entry),
            StepKind::FuncEnter { callee } => {
                format!("Call {}() (depth {})", callee, self.frame.call_depth)
            }
            StepKind::FuncExit { callee } => format!("Return from {}()", callee),
            StepKind::VarDeclare { name, var_type, .. } => match var_type {
                Some(t) => format!("Declare {} {} in {}()", t, name, function),
                None => format!("Declare {} in {}()", name, function),
            },
            StepKind::VarAssign {
                name,
                value,
                via_pointer,
                ..
            } => match via_pointer {
                Some(pointer) => format!("{} = {} (written through {})", name, value, pointer),
                None => format!("{} = {}", name, value),
            },
            StepKind::ArrayCreate {
                name,
                base_type,
                dimensions,
                is_stack,
                ..
            } => {
                let dims: String = dimensions.iter().map(|d| format!("[{}]", d)).collect();
                format!(
                    "Create {} array {} {}{}",
                    if *is_stack { "stack" } else { "heap" },
                    base_type.as_deref().unwrap_or("?"),
                    name,
                    dims
                )
            }
            StepKind::ArrayInit { name, values } => {
                format!("Initialize {} with {} values", name, values.len())
            }
            StepKind::ArrayIndexAssign {
                name,
                indices,
                value,
            } => {
                let idx: String = indices.iter().map(|i| format!("[{}]", i)).collect();
                format!("{}{} = {}", name, idx, value)
            }
            StepKind::PointerAlias {
                name,
                target_name,
                is_heap,
                heap_address,
                ..
            } => match (target_name, is_heap, heap_address) {
                (_, true, Some(addr)) => format!("{} points to heap block 0x{:x}", name, addr),
                (_, true, None) => format!("{} points to the heap", name),
                (Some(target), false, _) => format!("{} points to {}", name, target),
                (None, false, _) => format!("{} points to an unknown target", name),
            },
            StepKind::PointerDerefWrite {
                name,
                value,
                target_name,
                is_heap,
                ..
            } => match (target_name, is_heap) {
                (_, true) => format!("*{} = {} (heap)", name, value),
                (Some(target), false) => format!("*{} = {} (writes {})", name, value, target),
                (None, false) => format!("*{} = {} (unknown target)", name, value),
            },
            StepKind::HeapAlloc { address, size } => {
                format!("Allocate {} bytes at 0x{:x}", size, address)
            }
            StepKind::HeapFree {
                address,
                known,
                double_free,
                ..
            } => {
                if *double_free {
                    format!("Free 0x{:x} again (double free)", address)
                } else if !*known {
                    format!("Free 0x{:x} (untracked block)", address)
                } else {
                    format!("Free 0x{:x}", address)
                }
            }
            StepKind::HeapWrite { address, value, .. } => {
                format!("Write {} to heap 0x{:x}", value, address)
            }
            StepKind::LoopStart { loop_id, loop_type } => match loop_type {
                Some(t) => format!("Start {} loop #{}", t, loop_id),
                None => format!("Start loop #{}", loop_id),
            },
            StepKind::LoopCondition {
                loop_id, result, ..
            } => format!(
                "Loop #{} condition is {}",
                loop_id,
                if *result { "true" } else { "false" }
            ),
            StepKind::LoopBodyStart { loop_id, iteration } => {
                format!("Loop #{} iteration {} begins", loop_id, iteration)
            }
            StepKind::LoopIterationEnd { loop_id, iteration } => {
                format!("Loop #{} iteration {} ends", loop_id, iteration)
            }
            StepKind::LoopEnd {
                loop_id,
                total_iterations,
            } => format!(
                "Loop #{} finished after {} iteration{}",
                loop_id,
                total_iterations,
                if *total_iterations == 1 { "" } else { "s" }
            ),
            StepKind::ControlFlow { control_type } => format!("Control flow: {}", control_type),
            StepKind::BlockEnter { .. } => "Enter block".to_string(),
            StepKind::BlockExit { .. } => "Leave block".to_string(),
            StepKind::Return {
                value,
                destination,
                ..
            } => match destination {
                Some(dest) => format!("{}() returns {} into {}", function, value, dest),
                None => format!("{}() returns {}", function, value),
            },
            StepKind::ScopeExit { destroyed, .. } => {
                format!("{} go out of scope", destroyed.join(", "))
            }
            StepKind::Output { text, .. } => format!("Output: {}", text),
            StepKind::ProgramEnd { dangling_frames } => {
                if *dangling_frames == 0 {
                    "Program ends".to_string()
                } else {
                    format!(
                        "Program ends abnormally ({} frame{} left open)",
                        dangling_frames,
                        if *dangling_frames == 1 { "" } else { "s" }
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(kind: StepKind) -> SemanticStep {
        SemanticStep {
            index: 3,
            location: SourceLocation::new("prog.c", 12),
            frame: FrameMetadata {
                function: "main".to_string(),
                frame_id: "main-0".to_string(),
                call_depth: 0,
                call_index: 0,
                parent_frame_id: None,
            },
            scope: ScopeTag::Function,
            kind,
        }
    }

    #[test]
    fn test_serialized_shape() {
        let s = step(StepKind::PointerDerefWrite {
            name: "px".to_string(),
            value: Value::Int(9),
            target_name: Some("x".to_string()),
            is_heap: false,
            heap_address: None,
            target_frame_id: Some("main-0".to_string()),
        });
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["eventType"], json!("pointer_deref_write"));
        assert_eq!(v["frameId"], json!("main-0"));
        assert_eq!(v["callDepth"], json!(0));
        assert_eq!(v["scope"], json!("function"));
        assert_eq!(v["targetName"], json!("x"));
        assert_eq!(v["isHeap"], json!(false));
        assert_eq!(v["location"]["line"], json!(12));
        assert_eq!(v["value"], json!(9));
    }

    #[test]
    fn test_explanations_are_derived_from_fields() {
        let s = step(StepKind::ScopeExit {
            destroyed: vec!["i".to_string(), "sum".to_string()],
            scope_kind: ScopeKind::LoopIteration,
            loop_id: Some(0),
            iteration: Some(2),
        });
        assert_eq!(s.explanation(), "i, sum go out of scope");
        assert_eq!(s.explanation(), s.clone().explanation());

        let s = step(StepKind::LoopEnd {
            loop_id: 1,
            total_iterations: 1,
        });
        assert_eq!(s.explanation(), "Loop #1 finished after 1 iteration");

        let s = step(StepKind::HeapAlloc {
            address: 0x10,
            size: 4,
        });
        assert_eq!(s.tag(), "heap_alloc");
        assert_eq!(s.explanation(), "Allocate 4 bytes at 0x10");
    }
}
