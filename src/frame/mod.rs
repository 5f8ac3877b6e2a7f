//! Call frames reconstructed from the event stream
//!
//! This module provides the per-session frame bookkeeping:
//! - [`FrameStack`]: the call stack, with activation and call-index counters
//! - [`CallFrame`]: one live function activation
//! - [`scope`]: lexical scopes within a frame, and declaration deduplication
//! - [`alias`]: per-frame pointer alias tables and cross-frame resolution
//!
//! # Frame Identity
//!
//! A frame id is `<function>-<n>`, where `n` counts previous activations of
//! the same function in this session (starting at 0). Recursive calls
//! therefore get distinct ids. Together with the parent id and call depth,
//! this lets a replay consumer rebuild the call tree from the steps alone.
//!
//! # Alias Inheritance
//!
//! A new frame starts with a value copy of its caller's alias table. The
//! callee can resolve pointers it received by value, and nothing it does to
//! its own table leaks back into the caller.

pub mod alias;
pub mod scope;

use alias::AliasTable;
use rustc_hash::FxHashMap;
use scope::{Scope, ScopeKind};
use serde::Serialize;

/// Frame identity stamped onto every step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    pub function: String,
    pub frame_id: String,
    pub call_depth: usize,
    pub call_index: u64,
    pub parent_frame_id: Option<String>,
}

impl FrameMetadata {
    /// Metadata for steps emitted while no frame is open
    pub fn global(function: &str) -> Self {
        FrameMetadata {
            function: function.to_string(),
            frame_id: crate::engine::constants::GLOBAL_FRAME_ID.to_string(),
            call_depth: 0,
            call_index: 0,
            parent_frame_id: None,
        }
    }
}

/// One live function activation
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub frame_id: String,
    pub function_name: String,
    pub call_depth: usize,
    pub parent_frame_id: Option<String>,
    pub call_index: u64,
    pub aliases: AliasTable,
    scope_stack: Vec<Scope>,
}

impl CallFrame {
    fn new(
        frame_id: String,
        function_name: String,
        call_depth: usize,
        parent_frame_id: Option<String>,
        call_index: u64,
        aliases: AliasTable,
    ) -> Self {
        CallFrame {
            frame_id,
            function_name,
            call_depth,
            parent_frame_id,
            call_index,
            aliases,
            // The function scope is entered implicitly with the frame
            scope_stack: vec![Scope::new(ScopeKind::Function)],
        }
    }

    pub fn metadata(&self) -> FrameMetadata {
        FrameMetadata {
            function: self.function_name.clone(),
            frame_id: self.frame_id.clone(),
            call_depth: self.call_depth,
            call_index: self.call_index,
            parent_frame_id: self.parent_frame_id.clone(),
        }
    }

    /// Open scopes, outermost (function scope) first
    pub fn scopes(&self) -> &[Scope] {
        &self.scope_stack
    }
}

/// The reconstructed call stack for one session
#[derive(Debug, Clone, Default)]
pub struct FrameStack {
    frames: Vec<CallFrame>,
    activations: FxHashMap<String, u32>,
    next_call_index: u64,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame for `function_name` and return it
    pub fn push_frame(&mut self, function_name: &str) -> &CallFrame {
        let ordinal = self.activations.entry(function_name.to_string()).or_insert(0);
        let frame_id = format!("{}-{}", function_name, ordinal);
        *ordinal += 1;

        let call_index = self.next_call_index;
        self.next_call_index += 1;

        let (parent_frame_id, aliases) = match self.frames.last() {
            Some(caller) => (Some(caller.frame_id.clone()), caller.aliases.clone()),
            None => (None, AliasTable::default()),
        };

        let frame = CallFrame::new(
            frame_id,
            function_name.to_string(),
            self.frames.len(),
            parent_frame_id,
            call_index,
            aliases,
        );
        self.frames.push(frame);
        &self.frames[self.frames.len() - 1]
    }

    /// Pop the top frame; `None` when the stack is empty
    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    /// Get the current (top) frame
    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// Get a mutable reference to the current frame
    pub fn current_frame_mut(&mut self) -> Option<&mut CallFrame> {
        self.frames.last_mut()
    }

    /// Metadata of the top frame
    pub fn frame_metadata(&self) -> Option<FrameMetadata> {
        self.current_frame().map(CallFrame::metadata)
    }

    /// Frames from the innermost outwards
    pub fn innermost_first(&self) -> impl Iterator<Item = &CallFrame> {
        self.frames.iter().rev()
    }

    /// Get the depth of the call stack
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Check if stack is empty
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alias::Target;

    #[test]
    fn test_push_assigns_identity() {
        let mut stack = FrameStack::new();
        let main = stack.push_frame("main").metadata();
        assert_eq!(main.frame_id, "main-0");
        assert_eq!(main.call_depth, 0);
        assert_eq!(main.call_index, 0);
        assert_eq!(main.parent_frame_id, None);

        let fact = stack.push_frame("fact").metadata();
        let fact_inner = stack.push_frame("fact").metadata();
        assert_eq!(fact.frame_id, "fact-0");
        assert_eq!(fact_inner.frame_id, "fact-1");
        assert_eq!(fact_inner.call_depth, 2);
        assert_eq!(fact_inner.call_index, 2);
        assert_eq!(fact_inner.parent_frame_id.as_deref(), Some("fact-0"));
    }

    #[test]
    fn test_pop_on_empty_stack() {
        let mut stack = FrameStack::new();
        assert!(stack.pop_frame().is_none());
        assert!(stack.frame_metadata().is_none());

        stack.push_frame("main");
        assert_eq!(stack.pop_frame().map(|f| f.frame_id), Some("main-0".to_string()));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_call_index_keeps_increasing_after_pop() {
        let mut stack = FrameStack::new();
        stack.push_frame("main");
        stack.push_frame("helper");
        stack.pop_frame();
        let again = stack.push_frame("helper").metadata();
        assert_eq!(again.frame_id, "helper-1");
        assert_eq!(again.call_index, 2);
        assert_eq!(again.call_depth, 1);
    }

    #[test]
    fn test_alias_table_is_copied_on_push() {
        let mut stack = FrameStack::new();
        stack.push_frame("main");
        if let Some(main) = stack.current_frame_mut() {
            main.aliases
                .set_alias("px", Some(Target::Symbol("x".to_string())), false);
        }

        stack.push_frame("callee");
        if let Some(callee) = stack.current_frame_mut() {
            assert_eq!(
                callee.aliases.resolve("px"),
                Some(Target::Symbol("x".to_string()))
            );
            callee
                .aliases
                .set_alias("px", Some(Target::Symbol("y".to_string())), false);
        }
        stack.pop_frame();

        // The callee's change did not leak into the caller
        let main = stack.current_frame().unwrap();
        assert_eq!(
            main.aliases.resolve("px"),
            Some(Target::Symbol("x".to_string()))
        );
    }
}
