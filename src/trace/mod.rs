// Input and output of one analysis pass

use crate::engine::constants::{GLOBAL_SCOPE, RETURN_TYPE_PLACEHOLDER};
use crate::engine::errors::Diagnostics;
use crate::event::{RawEvent, Value};
use crate::step::SemanticStep;
use rustc_hash::FxHashMap;
use serde::Serialize;

/// Everything one pass consumes
#[derive(Debug, Clone, Default)]
pub struct TraceInput {
    pub events: Vec<RawEvent>,
    /// Captured standard output of the traced run
    pub stdout: String,
    /// Captured standard error of the traced run
    pub stderr: String,
    /// Functions known to exist, whether or not they were called
    pub known_functions: Vec<String>,
}

impl TraceInput {
    pub fn new(events: Vec<RawEvent>) -> Self {
        TraceInput {
            events,
            ..Self::default()
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn with_known_functions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_functions = names.into_iter().map(Into::into).collect();
        self
    }
}

/// A symbol seen before the entry point ran
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSymbol {
    pub name: String,
    pub var_type: Option<String>,
    pub value: Value,
    pub scope: String,
}

/// A function seen during the pass or listed as known
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSummary {
    pub name: String,
    /// First line the function was seen at, 0 if never entered
    pub line: u32,
    pub return_type: String,
}

/// Flags a replay consumer can use to decide what to render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceCapabilities {
    pub heap_tracking: bool,
    pub pointer_resolution: bool,
    pub scope_tracking: bool,
    pub loop_tracking: bool,
    pub output_captured: bool,
    /// Step indices are exactly 0..total_steps
    pub deterministic_step_count: bool,
}

impl TraceCapabilities {
    /// Derive the flags from the emitted steps
    pub fn from_steps(steps: &[SemanticStep]) -> Self {
        let has = |tags: &[&str]| steps.iter().any(|s| tags.contains(&s.tag()));
        TraceCapabilities {
            heap_tracking: has(&["heap_alloc", "heap_free", "heap_write"]),
            pointer_resolution: has(&["pointer_alias", "pointer_deref_write"]),
            scope_tracking: has(&["scope_exit"]),
            loop_tracking: has(&["loop_start"]),
            output_captured: has(&["output"]),
            deterministic_step_count: steps.iter().enumerate().all(|(i, s)| s.index == i),
        }
    }
}

/// Ordered global-symbol table
#[derive(Debug, Clone, Default)]
pub(crate) struct GlobalTable {
    symbols: Vec<GlobalSymbol>,
    index: FxHashMap<String, usize>,
}

impl GlobalTable {
    pub(crate) fn declare(&mut self, name: &str, var_type: Option<&str>) {
        if let Some(&i) = self.index.get(name) {
            if self.symbols[i].var_type.is_none() {
                self.symbols[i].var_type = var_type.map(str::to_string);
            }
            return;
        }
        self.insert(name, var_type, Value::Uninitialized);
    }

    pub(crate) fn assign(&mut self, name: &str, value: &Value) {
        match self.index.get(name) {
            Some(&i) => self.symbols[i].value = value.clone(),
            None => self.insert(name, None, value.clone()),
        }
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn insert(&mut self, name: &str, var_type: Option<&str>, value: Value) {
        self.index.insert(name.to_string(), self.symbols.len());
        self.symbols.push(GlobalSymbol {
            name: name.to_string(),
            var_type: var_type.map(str::to_string),
            value,
            scope: GLOBAL_SCOPE.to_string(),
        });
    }

    pub(crate) fn into_vec(self) -> Vec<GlobalSymbol> {
        self.symbols
    }
}

/// Functions in order of first appearance
#[derive(Debug, Clone, Default)]
pub(crate) struct FunctionIndex {
    functions: Vec<FunctionSummary>,
    index: FxHashMap<String, usize>,
}

impl FunctionIndex {
    pub(crate) fn record(&mut self, name: &str, line: u32) {
        match self.index.get(name) {
            Some(&i) => {
                let summary = &mut self.functions[i];
                if summary.line == 0 {
                    summary.line = line;
                }
            }
            None => {
                self.index.insert(name.to_string(), self.functions.len());
                self.functions.push(FunctionSummary {
                    name: name.to_string(),
                    line,
                    return_type: RETURN_TYPE_PLACEHOLDER.to_string(),
                });
            }
        }
    }

    /// Fill in the return type if it is still the placeholder
    pub(crate) fn set_return_type(&mut self, name: &str, return_type: &str) {
        if let Some(&i) = self.index.get(name) {
            let summary = &mut self.functions[i];
            if summary.return_type == RETURN_TYPE_PLACEHOLDER {
                summary.return_type = return_type.to_string();
            }
        }
    }

    pub(crate) fn into_vec(self) -> Vec<FunctionSummary> {
        self.functions
    }
}

/// Result of one pass: the ordered steps plus summary metadata
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResult {
    steps: Vec<SemanticStep>,
    pub globals: Vec<GlobalSymbol>,
    pub functions: Vec<FunctionSummary>,
    pub capabilities: TraceCapabilities,
    pub total_steps: usize,
    pub diagnostics: Diagnostics,
}

impl TraceResult {
    pub fn new(
        steps: Vec<SemanticStep>,
        globals: Vec<GlobalSymbol>,
        functions: Vec<FunctionSummary>,
        diagnostics: Diagnostics,
    ) -> Self {
        TraceResult {
            capabilities: TraceCapabilities::from_steps(&steps),
            total_steps: steps.len(),
            steps,
            globals,
            functions,
            diagnostics,
        }
    }

    /// All steps, in emission order
    pub fn steps(&self) -> &[SemanticStep] {
        &self.steps
    }

    /// Get a step by index
    pub fn get(&self, index: usize) -> Option<&SemanticStep> {
        self.steps.get(index)
    }

    /// Get the number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SemanticStep> {
        self.steps.iter()
    }

    /// Steps with the given event-type tag
    pub fn steps_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a SemanticStep> {
        self.steps.iter().filter(move |s| s.tag() == tag)
    }
}

impl<'a> IntoIterator for &'a TraceResult {
    type Item = &'a SemanticStep;
    type IntoIter = std::slice::Iter<'a, SemanticStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_index_keeps_first_line_and_return_type() {
        let mut functions = FunctionIndex::default();
        functions.record("helper", 0);
        functions.record("main", 3);
        functions.record("helper", 9);
        functions.record("helper", 20);
        functions.set_return_type("helper", "int");
        functions.set_return_type("helper", "void");

        let list = functions.into_vec();
        assert_eq!(list[0].name, "helper");
        assert_eq!(list[0].line, 9);
        assert_eq!(list[0].return_type, "int");
        assert_eq!(list[1].return_type, RETURN_TYPE_PLACEHOLDER);
    }

    #[test]
    fn test_global_table_updates_in_place() {
        let mut globals = GlobalTable::default();
        globals.declare("counter", Some("int"));
        globals.assign("counter", &Value::Int(4));
        globals.assign("limit", &Value::Int(10));
        globals.declare("limit", Some("long"));

        assert!(globals.contains("limit"));
        let list = globals.into_vec();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].value, Value::Int(4));
        assert_eq!(list[1].var_type.as_deref(), Some("long"));
        assert_eq!(list[1].scope, GLOBAL_SCOPE);
    }

    #[test]
    fn test_empty_result() {
        let result = TraceResult::new(Vec::new(), Vec::new(), Vec::new(), Diagnostics::default());
        assert!(result.is_empty());
        assert_eq!(result.total_steps, 0);
        assert!(result.capabilities.deterministic_step_count);
        assert!(!result.capabilities.heap_tracking);
    }
}
