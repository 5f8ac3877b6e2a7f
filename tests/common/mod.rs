// Event builders shared by the integration tests
#![allow(dead_code)]

use steptrace::event::{Address, EventKind, RawEvent, SourceLocation, Value};
use steptrace::{assemble, SemanticStep, StepKind, TraceInput, TraceResult};

pub fn enter(name: &str) -> EventKind {
    EventKind::FuncEnter {
        name: name.to_string(),
    }
}

pub fn exit(name: &str) -> EventKind {
    EventKind::FuncExit {
        name: name.to_string(),
    }
}

pub fn declare(name: &str, var_type: &str) -> EventKind {
    EventKind::Declare {
        name: name.to_string(),
        var_type: Some(var_type.to_string()),
        address: None,
    }
}

pub fn declare_at(name: &str, var_type: &str, address: Address) -> EventKind {
    EventKind::Declare {
        name: name.to_string(),
        var_type: Some(var_type.to_string()),
        address: Some(address),
    }
}

pub fn assign(name: &str, value: i64) -> EventKind {
    EventKind::Assign {
        name: name.to_string(),
        value: Value::Int(value),
    }
}

pub fn alias(pointer: &str, target: &str) -> EventKind {
    EventKind::PointerAlias {
        pointer: pointer.to_string(),
        target: Some(target.to_string()),
        address: None,
        decayed_from_array: false,
    }
}

pub fn alias_address(pointer: &str, address: Address) -> EventKind {
    EventKind::PointerAlias {
        pointer: pointer.to_string(),
        target: None,
        address: Some(address),
        decayed_from_array: false,
    }
}

pub fn deref(pointer: &str, value: i64) -> EventKind {
    EventKind::PointerDerefWrite {
        pointer: pointer.to_string(),
        value: Value::Int(value),
    }
}

pub fn loop_start(loop_id: u32) -> EventKind {
    EventKind::LoopStart {
        loop_id,
        loop_type: Some("for".to_string()),
    }
}

pub fn body(loop_id: u32) -> EventKind {
    EventKind::LoopBodyStart { loop_id }
}

pub fn iteration_end(loop_id: u32) -> EventKind {
    EventKind::LoopIterationEnd { loop_id }
}

pub fn loop_end(loop_id: u32) -> EventKind {
    EventKind::LoopEnd { loop_id }
}

pub fn block_enter() -> EventKind {
    EventKind::BlockEnter { depth: None }
}

pub fn block_exit() -> EventKind {
    EventKind::BlockExit { depth: None }
}

/// Number the events and attach a line per event
pub fn events(kinds: Vec<EventKind>) -> Vec<RawEvent> {
    kinds
        .into_iter()
        .enumerate()
        .map(|(i, kind)| {
            RawEvent::new(kind)
                .with_id(i as u64)
                .at(SourceLocation::new("prog.c", i as u32 + 1))
        })
        .collect()
}

pub fn run(kinds: Vec<EventKind>) -> TraceResult {
    assemble(&TraceInput::new(events(kinds)))
}

pub fn tags(result: &TraceResult) -> Vec<&'static str> {
    result.iter().map(SemanticStep::tag).collect()
}

/// Destroyed symbols of every scope_exit, in order
pub fn destroyed(result: &TraceResult) -> Vec<Vec<String>> {
    result
        .iter()
        .filter_map(|s| match &s.kind {
            StepKind::ScopeExit { destroyed, .. } => Some(destroyed.clone()),
            _ => None,
        })
        .collect()
}

/// Every entered frame is exited exactly once, and nothing else is exited
pub fn assert_frames_balanced(result: &TraceResult) {
    let mut open: Vec<String> = Vec::new();
    for step in result {
        match &step.kind {
            StepKind::ProgramStart { .. } | StepKind::FuncEnter { .. } => {
                assert!(
                    !open.contains(&step.frame.frame_id),
                    "frame {} entered twice",
                    step.frame.frame_id
                );
                open.push(step.frame.frame_id.clone());
            }
            StepKind::FuncExit { .. } => {
                assert_eq!(
                    open.pop().as_deref(),
                    Some(step.frame.frame_id.as_str()),
                    "func_exit out of order at step {}",
                    step.index
                );
            }
            _ => {}
        }
    }
    assert!(open.is_empty(), "frames left open: {:?}", open);
}

/// Every declared symbol is destroyed exactly once, in the frame that declared it
pub fn assert_declarations_destroyed(result: &TraceResult) {
    let mut declared: Vec<(String, String)> = Vec::new();
    let mut destroyed: Vec<(String, String)> = Vec::new();
    for step in result {
        match &step.kind {
            StepKind::VarDeclare { name, .. } | StepKind::ArrayCreate { name, .. } => {
                declared.push((step.frame.frame_id.clone(), name.clone()))
            }
            StepKind::ScopeExit { destroyed: names, .. } => destroyed.extend(
                names
                    .iter()
                    .map(|name| (step.frame.frame_id.clone(), name.clone())),
            ),
            _ => {}
        }
    }
    declared.sort();
    destroyed.sort();
    assert_eq!(declared, destroyed);
}
