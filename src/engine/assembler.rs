// Trace assembler: drives one pass from raw events to semantic steps

use crate::engine::errors::{Diagnostics, TraceError};
use crate::engine::heap::HeapRegistry;
use crate::engine::loops::LoopCounter;
use crate::engine::EngineConfig;
use crate::event::{normalize_function_name, Address, EventKind, RawEvent, SourceLocation};
use crate::frame::scope::{destroyed_symbols, ScopeExit};
use crate::frame::{FrameMetadata, FrameStack};
use crate::step::output::{segment, OutputStream};
use crate::step::{ScopeTag, SemanticStep, StepKind};
use crate::trace::{FunctionIndex, GlobalTable, TraceInput, TraceResult};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Lifecycle of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// The entry point has not been entered yet
    NotStarted,
    /// Between the entry point's first `func_enter` and its `func_exit`
    Running,
    /// The entry point returned, or the event list ended
    Finished,
}

/// The per-session analysis state machine
pub struct TraceAssembler {
    config: EngineConfig,
    state: AssemblerState,

    /// Reconstructed call stack
    pub(crate) frames: FrameStack,

    /// Iteration counters for running loops
    pub(crate) loops: LoopCounter,

    /// Heap blocks reported by the tracer
    pub(crate) heap: HeapRegistry,

    /// Stack addresses from declarations: address -> (owning frame id, symbol)
    pub(crate) stack_addresses: FxHashMap<Address, (String, String)>,

    pub(crate) globals: GlobalTable,
    pub(crate) functions: FunctionIndex,
    pub(crate) diagnostics: Diagnostics,

    /// Emitted steps, append-only
    steps: Vec<SemanticStep>,

    /// Metadata of the entry frame, kept for steps emitted after it closes
    root: Option<FrameMetadata>,

    /// Location of the last processed event
    last_location: SourceLocation,

    /// Events dropped because they arrived after the entry point returned
    ignored_after_exit: usize,

    /// Calls entered outside the entry point (static initializers, atexit
    /// handlers) whose exits are still pending
    ignored_calls: Vec<String>,
}

impl TraceAssembler {
    pub fn new(config: EngineConfig) -> Self {
        TraceAssembler {
            config,
            state: AssemblerState::NotStarted,
            frames: FrameStack::new(),
            loops: LoopCounter::new(),
            heap: HeapRegistry::new(),
            stack_addresses: FxHashMap::default(),
            globals: GlobalTable::default(),
            functions: FunctionIndex::default(),
            diagnostics: Diagnostics::default(),
            steps: Vec::new(),
            root: None,
            last_location: SourceLocation::unknown(),
            ignored_after_exit: 0,
            ignored_calls: Vec::new(),
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Steps emitted so far
    pub fn steps(&self) -> &[SemanticStep] {
        &self.steps
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Record a degraded condition found outside the pass, e.g. by the loader
    pub fn record_diagnostic(&mut self, err: TraceError) {
        self.diagnostics.record(err);
    }

    /// Run the whole pass over `input`
    pub fn run(mut self, input: &TraceInput) -> TraceResult {
        for event in &input.events {
            self.process(event);
        }
        self.finish(&input.stdout, &input.stderr, &input.known_functions)
    }

    /// Feed one event
    pub fn process(&mut self, event: &RawEvent) {
        if let Err(err) = event.validate() {
            self.diagnostics.record(err);
            return;
        }
        self.last_location = event.location.clone();

        match self.state {
            AssemblerState::NotStarted => self.process_before_entry(event),
            AssemblerState::Running => self.classify(event),
            AssemblerState::Finished => {
                match &event.kind {
                    EventKind::FuncEnter { name } => self.ignore_call(name),
                    EventKind::FuncExit { name } => {
                        self.exit_ignored_call(name);
                        return;
                    }
                    _ => {}
                }
                self.ignored_after_exit += 1;
                debug!(
                    "ignoring {} event #{} after {}() returned",
                    event.kind.name(),
                    event.id,
                    self.config.entry_point
                );
            }
        }
    }

    /// Before the entry point only global declarations are of interest
    fn process_before_entry(&mut self, event: &RawEvent) {
        match &event.kind {
            EventKind::FuncEnter { name }
                if normalize_function_name(name) == self.config.entry_point =>
            {
                self.start_program(&event.location);
            }
            EventKind::FuncEnter { name } => self.ignore_call(name),
            EventKind::FuncExit { name } => self.exit_ignored_call(name),
            EventKind::Declare { name, var_type, .. } if self.config.record_globals => {
                self.globals.declare(name, var_type.as_deref());
            }
            EventKind::Assign { name, value } | EventKind::VarTrace { name, value, .. }
                if self.config.record_globals =>
            {
                self.globals.assign(name, value);
            }
            other => debug!(
                "ignoring {} event before {}()",
                other.name(),
                self.config.entry_point
            ),
        }
    }

    fn ignore_call(&mut self, name: &str) {
        debug!("ignoring call to {}() outside {}()", name, self.config.entry_point);
        self.ignored_calls.push(normalize_function_name(name).to_string());
    }

    /// Match an exit against the ignored calls; anything else is an underflow
    fn exit_ignored_call(&mut self, name: &str) {
        let name = normalize_function_name(name);
        if self.ignored_calls.last().is_some_and(|open| open == name) {
            self.ignored_calls.pop();
            return;
        }
        self.diagnostics.record(TraceError::FrameUnderflow {
            function: name.to_string(),
        });
    }

    fn start_program(&mut self, location: &SourceLocation) {
        let entry = self.config.entry_point.clone();
        self.functions.record(&entry, location.line);
        let meta = self.frames.push_frame(&entry).metadata();
        self.root = Some(meta.clone());
        self.state = AssemblerState::Running;
        self.push_step(
            meta,
            ScopeTag::Function,
            location,
            StepKind::ProgramStart { entry },
        );
    }

    /// Close open frames, emit output and `program_end`, and build the result
    pub fn finish(
        mut self,
        stdout: &str,
        stderr: &str,
        known_functions: &[String],
    ) -> TraceResult {
        let location = self.last_location.clone();
        let mut dangling = 0;
        while let Some(frame_id) = self.frames.current_frame().map(|f| f.frame_id.clone()) {
            self.diagnostics
                .record(TraceError::DanglingFrame { frame_id });
            self.close_frame(&location);
            dangling += 1;
        }

        if self.state == AssemblerState::NotStarted {
            debug!("{}() was never entered", self.config.entry_point);
        }
        if self.ignored_after_exit > 0 {
            debug!(
                "{} events after {}() returned were ignored",
                self.ignored_after_exit, self.config.entry_point
            );
        }
        self.state = AssemblerState::Finished;

        let mut lines = segment(stdout, OutputStream::Stdout);
        if self.config.capture_stderr {
            lines.extend(segment(stderr, OutputStream::Stderr));
        }
        let unknown = SourceLocation::unknown();
        for line in lines {
            self.emit(
                &unknown,
                StepKind::Output {
                    text: line.text,
                    raw: line.raw,
                    escapes: line.escapes,
                    stream: line.stream,
                },
            );
        }
        self.emit(
            &location,
            StepKind::ProgramEnd {
                dangling_frames: dangling,
            },
        );

        for name in known_functions {
            self.functions.record(normalize_function_name(name), 0);
        }

        TraceResult::new(
            self.steps,
            self.globals.into_vec(),
            self.functions.into_vec(),
            self.diagnostics,
        )
    }

    /// Pop the top frame, emitting its aggregated `scope_exit` and its `func_exit`
    pub(crate) fn close_frame(&mut self, location: &SourceLocation) -> Option<FrameMetadata> {
        let mut frame = self.frames.pop_frame()?;
        let meta = frame.metadata();
        let exits = frame.close_all();
        self.emit_scope_exit(&meta, &exits, location);

        self.stack_addresses
            .retain(|_, (owner, _)| *owner != meta.frame_id);

        self.push_step(
            meta.clone(),
            ScopeTag::Function,
            location,
            StepKind::FuncExit {
                callee: meta.function.clone(),
            },
        );

        if meta.call_depth == 0 {
            self.root = Some(meta.clone());
            self.state = AssemblerState::Finished;
        }
        Some(meta)
    }

    /// Emit one `scope_exit` for closed scopes (innermost first), if any
    /// symbol was destroyed
    pub(crate) fn emit_scope_exit(
        &mut self,
        frame: &FrameMetadata,
        exits: &[ScopeExit],
        location: &SourceLocation,
    ) {
        let destroyed = destroyed_symbols(exits);
        if destroyed.is_empty() {
            return;
        }
        let (Some(innermost), Some(outermost)) = (exits.first(), exits.last()) else {
            return;
        };
        self.push_step(
            frame.clone(),
            innermost.kind.into(),
            location,
            StepKind::ScopeExit {
                destroyed,
                scope_kind: outermost.kind,
                loop_id: outermost.loop_id,
                iteration: outermost.iteration,
            },
        );
    }

    /// Frame and scope to stamp on a step emitted now
    pub(crate) fn current_stamp(&self) -> (FrameMetadata, ScopeTag) {
        match self.frames.current_frame() {
            Some(frame) => (
                frame.metadata(),
                frame
                    .current_scope_kind()
                    .map(ScopeTag::from)
                    .unwrap_or(ScopeTag::Function),
            ),
            None => (
                self.root
                    .clone()
                    .unwrap_or_else(|| FrameMetadata::global(&self.config.entry_point)),
                ScopeTag::Global,
            ),
        }
    }

    /// Emit a step stamped with the current frame and scope
    pub(crate) fn emit(&mut self, location: &SourceLocation, kind: StepKind) {
        let (frame, scope) = self.current_stamp();
        self.push_step(frame, scope, location, kind);
    }

    fn push_step(
        &mut self,
        frame: FrameMetadata,
        scope: ScopeTag,
        location: &SourceLocation,
        kind: StepKind,
    ) {
        let index = self.steps.len();
        debug!("step {}: {} in {}", index, kind.tag(), frame.frame_id);
        self.steps.push(SemanticStep {
            index,
            location: location.clone(),
            frame,
            scope,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Value;

    fn event(kind: EventKind, line: u32) -> RawEvent {
        RawEvent::new(kind).at(SourceLocation::at_line(line))
    }

    #[test]
    fn test_state_transitions() {
        let mut assembler = TraceAssembler::new(EngineConfig::default());
        assert_eq!(assembler.state(), AssemblerState::NotStarted);

        assembler.process(&event(
            EventKind::FuncEnter {
                name: "main".to_string(),
            },
            1,
        ));
        assert_eq!(assembler.state(), AssemblerState::Running);

        assembler.process(&event(
            EventKind::FuncExit {
                name: "main".to_string(),
            },
            4,
        ));
        assert_eq!(assembler.state(), AssemblerState::Finished);

        // Dropped: the program is over
        assembler.process(&event(
            EventKind::Assign {
                name: "x".to_string(),
                value: Value::Int(1),
            },
            5,
        ));
        assert_eq!(assembler.steps().len(), 2);
    }

    #[test]
    fn test_events_before_entry_become_globals() {
        let mut assembler = TraceAssembler::new(EngineConfig::default());
        assembler.process(&event(
            EventKind::Declare {
                name: "limit".to_string(),
                var_type: Some("int".to_string()),
                address: None,
            },
            1,
        ));
        assembler.process(&event(
            EventKind::Assign {
                name: "limit".to_string(),
                value: Value::Int(10),
            },
            1,
        ));
        assert!(assembler.steps().is_empty());

        let result = assembler.finish("", "", &[]);
        assert_eq!(result.globals.len(), 1);
        assert_eq!(result.globals[0].value, Value::Int(10));
        // Only program_end, stamped with the global frame
        assert_eq!(result.len(), 1);
        assert_eq!(result.steps()[0].frame.frame_id, "global");
        assert_eq!(result.steps()[0].scope, ScopeTag::Global);
    }

    #[test]
    fn test_custom_entry_point() {
        let config = EngineConfig {
            entry_point: "start".to_string(),
            ..EngineConfig::default()
        };
        let mut assembler = TraceAssembler::new(config);
        assembler.process(&event(
            EventKind::FuncEnter {
                name: "main".to_string(),
            },
            1,
        ));
        assert_eq!(assembler.state(), AssemblerState::NotStarted);
        assembler.process(&event(
            EventKind::FuncEnter {
                name: "start(void)".to_string(),
            },
            2,
        ));
        assert_eq!(assembler.state(), AssemblerState::Running);
        assert_eq!(assembler.steps()[0].frame.frame_id, "start-0");
    }

    #[test]
    fn test_calls_outside_entry_point_exit_quietly() {
        let mut assembler = TraceAssembler::new(EngineConfig::default());
        let call = |name: &str| EventKind::FuncEnter {
            name: name.to_string(),
        };
        let ret = |name: &str| EventKind::FuncExit {
            name: name.to_string(),
        };

        // A static initializer, then main, then an atexit handler
        assembler.process(&event(call("init_table(void)"), 1));
        assembler.process(&event(ret("init_table"), 2));
        assembler.process(&event(call("main"), 3));
        assembler.process(&event(ret("main"), 4));
        assembler.process(&event(call("cleanup"), 5));
        assembler.process(&event(ret("cleanup(void)"), 6));
        assert_eq!(assembler.diagnostics().frame_underflows, 0);

        // An exit nothing entered is still an underflow
        assembler.process(&event(ret("cleanup"), 7));
        assert_eq!(assembler.diagnostics().frame_underflows, 1);
        assert_eq!(assembler.steps().len(), 2);
    }

    #[test]
    fn test_stderr_capture_can_be_disabled() {
        let config = EngineConfig {
            capture_stderr: false,
            ..EngineConfig::default()
        };
        let result = TraceAssembler::new(config).finish("out\n", "err\n", &[]);
        let outputs: Vec<_> = result.steps_with_tag("output").collect();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].index, 0);
    }
}
