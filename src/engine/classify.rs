//! Event classification
//!
//! Adds `impl TraceAssembler` handlers that map each [`EventKind`] to zero,
//! one or two steps while the entry point is running. The match in
//! [`TraceAssembler::classify`] is exhaustive, so a new event kind cannot be
//! added without deciding what it emits.
//!
//! Exit events that skip intermediate exits (a `break` out of a nested block,
//! a `continue` that never reports `loop_iteration_end`) close every scope
//! down to the one they target, and the destroyed symbols of all of them are
//! reported in a single `scope_exit`.

use crate::engine::assembler::TraceAssembler;
use crate::engine::errors::TraceError;
use crate::engine::heap::FreeOutcome;
use crate::event::{normalize_function_name, Address, EventKind, RawEvent, SourceLocation, Value};
use crate::frame::alias::{resolve_across, Target, Walk};
use crate::frame::scope::ScopeExit;
use crate::frame::CallFrame;
use crate::step::StepKind;
use tracing::debug;

impl TraceAssembler {
    /// Handle one event while the entry point is running
    pub(crate) fn classify(&mut self, event: &RawEvent) {
        let location = &event.location;
        match &event.kind {
            EventKind::FuncEnter { name } => self.on_func_enter(name, location),
            EventKind::FuncExit { name } => self.on_func_exit(name, location),
            EventKind::Declare {
                name,
                var_type,
                address,
            } => {
                if self.declare_symbol(name, *address) {
                    self.emit(
                        location,
                        StepKind::VarDeclare {
                            name: name.clone(),
                            var_type: var_type.clone(),
                            address: *address,
                        },
                    );
                }
            }
            EventKind::Assign { name, value } | EventKind::VarTrace { name, value, .. } => {
                self.assign_symbol(name, value, None, location)
            }
            EventKind::ArrayCreate {
                name,
                base_type,
                dimensions,
                is_stack,
                address,
            } => {
                if self.declare_symbol(name, *address) {
                    self.emit(
                        location,
                        StepKind::ArrayCreate {
                            name: name.clone(),
                            base_type: base_type.clone(),
                            dimensions: dimensions.clone(),
                            is_stack: *is_stack,
                            address: *address,
                        },
                    );
                }
            }
            EventKind::ArrayInit { name, values } => self.emit(
                location,
                StepKind::ArrayInit {
                    name: name.clone(),
                    values: values.clone(),
                },
            ),
            EventKind::ArrayIndexAssign {
                name,
                indices,
                value,
            } => self.emit(
                location,
                StepKind::ArrayIndexAssign {
                    name: name.clone(),
                    indices: indices.clone(),
                    value: value.clone(),
                },
            ),
            EventKind::PointerAlias {
                pointer,
                target,
                address,
                decayed_from_array,
            } => {
                let target = self.alias_target(target.as_deref(), *address);
                self.on_pointer_alias(pointer, target, *decayed_from_array, location);
            }
            EventKind::PointerHeapInit { pointer, address } => {
                self.on_pointer_alias(pointer, Some(Target::Heap(*address)), false, location);
            }
            EventKind::PointerDerefWrite { pointer, value } => {
                self.on_deref_write(pointer, value, location)
            }
            EventKind::HeapAlloc { address, size } => {
                self.heap.allocate(*address, *size);
                self.emit(
                    location,
                    StepKind::HeapAlloc {
                        address: *address,
                        size: *size,
                    },
                );
            }
            EventKind::HeapFree { address } => {
                let (size, known, double_free) = match self.heap.free(*address) {
                    FreeOutcome::Freed { size } => (Some(size), true, false),
                    FreeOutcome::DoubleFree { size } => (Some(size), true, true),
                    FreeOutcome::Unknown => (None, false, false),
                };
                if double_free {
                    debug!("heap block 0x{:x} freed twice", address);
                }
                self.emit(
                    location,
                    StepKind::HeapFree {
                        address: *address,
                        size,
                        known,
                        double_free,
                    },
                );
            }
            EventKind::HeapWrite { address, value } => {
                let block = self.heap.containing_block(*address);
                self.emit(
                    location,
                    StepKind::HeapWrite {
                        address: *address,
                        value: value.clone(),
                        block_address: block.map(|(base, _)| base),
                        offset: block.map(|(_, offset)| offset),
                    },
                );
            }
            EventKind::LoopStart { loop_id, loop_type } => {
                self.loops.on_loop_start(*loop_id);
                self.emit(
                    location,
                    StepKind::LoopStart {
                        loop_id: *loop_id,
                        loop_type: loop_type.clone(),
                    },
                );
            }
            EventKind::LoopCondition { loop_id, result } => {
                let iteration = self.loops.current(*loop_id);
                self.emit(
                    location,
                    StepKind::LoopCondition {
                        loop_id: *loop_id,
                        result: *result,
                        iteration,
                    },
                );
            }
            EventKind::LoopBodyStart { loop_id } => self.on_loop_body_start(*loop_id, location),
            EventKind::LoopIterationEnd { loop_id } => {
                self.on_loop_iteration_end(*loop_id, location)
            }
            EventKind::LoopEnd { loop_id } => {
                // Iterations left open by `break` close with the loop
                self.close_scopes(location, |frame| {
                    if frame.has_loop_iteration(*loop_id) {
                        frame.close_loop_iteration(*loop_id)
                    } else {
                        Some(Vec::new())
                    }
                });
                let total_iterations = self.loops.on_loop_end(*loop_id);
                self.emit(
                    location,
                    StepKind::LoopEnd {
                        loop_id: *loop_id,
                        total_iterations,
                    },
                );
            }
            EventKind::ControlFlow { control_type } => self.emit(
                location,
                StepKind::ControlFlow {
                    control_type: control_type.clone(),
                },
            ),
            EventKind::BlockEnter { depth } => {
                if let Some(frame) = self.frames.current_frame_mut() {
                    frame.enter_block();
                }
                self.emit(location, StepKind::BlockEnter { block_depth: *depth });
            }
            EventKind::BlockExit { depth } => {
                if !self.close_scopes(location, |frame| frame.close_block()) {
                    self.record_scope_mismatch("block_exit");
                }
                self.emit(location, StepKind::BlockExit { block_depth: *depth });
            }
            EventKind::Return {
                value,
                return_type,
                destination,
            } => {
                if let (Some(frame), Some(return_type)) =
                    (self.frames.current_frame(), return_type.as_deref())
                {
                    let function = frame.function_name.clone();
                    self.functions.set_return_type(&function, return_type);
                }
                self.emit(
                    location,
                    StepKind::Return {
                        value: value.clone(),
                        return_type: return_type.clone(),
                        destination: destination.clone(),
                    },
                );
            }
            EventKind::Unrecognized { kind } => {
                debug!("no step for unrecognized event '{}' #{}", kind, event.id);
            }
        }
    }

    fn on_func_enter(&mut self, name: &str, location: &SourceLocation) {
        let name = normalize_function_name(name);
        self.functions.record(name, location.line);
        self.frames.push_frame(name);
        self.emit(
            location,
            StepKind::FuncEnter {
                callee: name.to_string(),
            },
        );
    }

    fn on_func_exit(&mut self, name: &str, location: &SourceLocation) {
        let name = normalize_function_name(name);
        match self.frames.current_frame() {
            None => {
                self.diagnostics.record(TraceError::FrameUnderflow {
                    function: name.to_string(),
                });
                return;
            }
            Some(top) if top.function_name != name => {
                // Missing exits in between; close the top frame anyway
                debug!(
                    "func_exit for '{}' while '{}' is on top",
                    name, top.frame_id
                );
            }
            Some(_) => {}
        }
        self.close_frame(location);
    }

    /// Declare `name` in the current scope. Returns false for a duplicate.
    fn declare_symbol(&mut self, name: &str, address: Option<Address>) -> bool {
        let Some(frame) = self.frames.current_frame_mut() else {
            return false;
        };
        if !frame.declare(name) {
            debug!(
                "duplicate declaration of '{}' in {} suppressed",
                name, frame.frame_id
            );
            return false;
        }
        let owner = frame.frame_id.clone();
        if let Some(address) = address {
            self.stack_addresses
                .insert(address, (owner, name.to_string()));
        }
        true
    }

    /// Emit a `var_assign`, updating the global table for global symbols
    fn assign_symbol(
        &mut self,
        name: &str,
        value: &Value,
        via_pointer: Option<&str>,
        location: &SourceLocation,
    ) {
        let owner = self.owner_of(name);
        self.assign_owned(name, value, via_pointer, owner, location);
    }

    /// Emit a `var_assign` for a symbol whose owning frame is already known
    fn assign_owned(
        &mut self,
        name: &str,
        value: &Value,
        via_pointer: Option<&str>,
        owner: Option<String>,
        location: &SourceLocation,
    ) {
        if owner.is_none() && self.globals.contains(name) {
            self.globals.assign(name, value);
        }
        self.emit(
            location,
            StepKind::VarAssign {
                name: name.to_string(),
                value: value.clone(),
                via_pointer: via_pointer.map(str::to_string),
                owner_frame_id: owner,
            },
        );
    }

    /// Innermost frame that declares `name`
    fn owner_of(&self, name: &str) -> Option<String> {
        self.frames
            .innermost_first()
            .find(|frame| frame.is_declared(name))
            .map(|frame| frame.frame_id.clone())
    }

    /// Turn an alias event's target into a [`Target`].
    ///
    /// A named target wins. Otherwise the address is looked up among live heap
    /// blocks, then among declared stack addresses. A stack address pins the
    /// target to the frame that declared it.
    fn alias_target(&self, name: Option<&str>, address: Option<Address>) -> Option<Target> {
        if let Some(name) = name {
            return Some(Target::Symbol(name.to_string()));
        }
        let address = address?;
        if self.heap.is_live(address) {
            return Some(Target::Heap(Some(address)));
        }
        self.stack_addresses
            .get(&address)
            .map(|(frame_id, symbol)| Target::Slot {
                name: symbol.clone(),
                frame_id: frame_id.clone(),
            })
    }

    /// Whether `target` is the storage of `pointer` itself
    fn is_self_target(&self, target: &Target, pointer: &str) -> bool {
        if target.symbol_name() != Some(pointer) {
            return false;
        }
        match target.frame_id() {
            Some(owner) => self.owner_of(pointer).as_deref() == Some(owner),
            None => true,
        }
    }

    fn resolve_pointer(&self, pointer: &str) -> Walk {
        resolve_across(
            self.frames.innermost_first().map(|frame| &frame.aliases),
            pointer,
        )
    }

    fn on_pointer_alias(
        &mut self,
        pointer: &str,
        target: Option<Target>,
        decayed_from_array: bool,
        location: &SourceLocation,
    ) {
        if let Some(frame) = self.frames.current_frame_mut() {
            frame.aliases.set_alias(pointer, target, decayed_from_array);
        }
        let resolved = match self.resolve_pointer(pointer) {
            Walk::Found(target) if !self.is_self_target(&target, pointer) => Some(target),
            _ => None,
        };
        self.emit(
            location,
            StepKind::PointerAlias {
                name: pointer.to_string(),
                target_name: resolved
                    .as_ref()
                    .and_then(Target::symbol_name)
                    .map(str::to_string),
                is_heap: resolved.as_ref().is_some_and(Target::is_heap),
                heap_address: resolved.as_ref().and_then(Target::heap_address),
                decayed_from_array,
            },
        );
    }

    fn on_deref_write(&mut self, pointer: &str, value: &Value, location: &SourceLocation) {
        let target = match self.resolve_pointer(pointer) {
            Walk::Found(target) if !self.is_self_target(&target, pointer) => Some(target),
            Walk::Cycle(revisited) => {
                self.diagnostics.record(TraceError::CyclicAlias {
                    pointer: pointer.to_string(),
                    revisited,
                });
                None
            }
            Walk::Found(_) | Walk::Unresolved => {
                self.diagnostics.record(TraceError::UnresolvedPointerTarget {
                    pointer: pointer.to_string(),
                });
                None
            }
        };

        match target {
            Some(Target::Symbol(name)) => {
                let owner = self.owner_of(&name);
                self.write_stack_target(pointer, name, owner, value, location);
            }
            Some(Target::Slot { name, frame_id }) => {
                self.write_stack_target(pointer, name, Some(frame_id), value, location);
            }
            Some(Target::Heap(heap_address)) => self.emit(
                location,
                StepKind::PointerDerefWrite {
                    name: pointer.to_string(),
                    value: value.clone(),
                    target_name: None,
                    is_heap: true,
                    heap_address,
                    target_frame_id: None,
                },
            ),
            None => self.emit(
                location,
                StepKind::PointerDerefWrite {
                    name: pointer.to_string(),
                    value: value.clone(),
                    target_name: None,
                    is_heap: false,
                    heap_address: None,
                    target_frame_id: None,
                },
            ),
        }
    }

    /// Emit the deref step and the companion assignment of the stack symbol
    fn write_stack_target(
        &mut self,
        pointer: &str,
        name: String,
        owner: Option<String>,
        value: &Value,
        location: &SourceLocation,
    ) {
        self.emit(
            location,
            StepKind::PointerDerefWrite {
                name: pointer.to_string(),
                value: value.clone(),
                target_name: Some(name.clone()),
                is_heap: false,
                heap_address: None,
                target_frame_id: owner.clone(),
            },
        );
        self.assign_owned(&name, value, Some(pointer), owner, location);
    }

    fn on_loop_body_start(&mut self, loop_id: u32, location: &SourceLocation) {
        // `continue` skips loop_iteration_end; close the previous iteration here
        self.close_scopes(location, |frame| {
            if frame.has_loop_iteration(loop_id) {
                frame.close_loop_iteration(loop_id)
            } else {
                Some(Vec::new())
            }
        });

        let iteration = self.loops.on_body_start(loop_id);
        if let Some(frame) = self.frames.current_frame_mut() {
            frame.enter_loop_iteration(loop_id, iteration);
        }
        self.emit(
            location,
            StepKind::LoopBodyStart { loop_id, iteration },
        );
    }

    fn on_loop_iteration_end(&mut self, loop_id: u32, location: &SourceLocation) {
        let mut closed_iteration = None;
        let matched = self.close_scopes(location, |frame| {
            let exits = frame.close_loop_iteration(loop_id)?;
            closed_iteration = exits.last().and_then(|exit| exit.iteration);
            Some(exits)
        });
        if !matched {
            self.record_scope_mismatch("loop_iteration_end");
        }

        let iteration = closed_iteration.unwrap_or_else(|| self.loops.current(loop_id));
        self.emit(
            location,
            StepKind::LoopIterationEnd { loop_id, iteration },
        );
    }

    /// Close scopes in the current frame and emit their `scope_exit`.
    ///
    /// Returns false if `close` found nothing to close.
    fn close_scopes<F>(&mut self, location: &SourceLocation, mut close: F) -> bool
    where
        F: FnMut(&mut CallFrame) -> Option<Vec<ScopeExit>>,
    {
        let Some(frame) = self.frames.current_frame_mut() else {
            return false;
        };
        let Some(exits) = close(frame) else {
            return false;
        };
        let meta = frame.metadata();
        self.emit_scope_exit(&meta, &exits, location);
        true
    }

    fn record_scope_mismatch(&mut self, event: &str) {
        let frame_id = self
            .frames
            .current_frame()
            .map(|frame| frame.frame_id.clone())
            .unwrap_or_default();
        self.diagnostics.record(TraceError::ScopeMismatch {
            event: event.to_string(),
            frame_id,
        });
    }
}
