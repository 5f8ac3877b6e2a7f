//! Lexical scopes within a call frame
//!
//! Every frame owns a stack of [`Scope`]s. The base is always exactly one
//! function scope, entered with the frame and only closed when the frame is
//! popped. Block and loop-iteration scopes are pushed and popped in nesting
//! order by the classifier.
//!
//! Each scope remembers the symbols declared directly in it, in declaration
//! order, so closing it reports a deterministic destroyed-symbol list.
//!
//! # Declaration Deduplication
//!
//! The instrumenter sometimes emits `declare` twice for one multi-variable
//! statement. [`CallFrame::try_declare`] accepts a name once per open scope;
//! a repeat in the same scope is rejected without touching any state.
//! Declaring the same name in a nested scope (shadowing) is a new symbol.
//!
//! # Shadowed Pointers
//!
//! A frame has one alias table, so a shadowing declaration parks the outer
//! symbol's alias entry in the new scope. Closing that scope puts it back;
//! closing a scope drops the aliases of symbols that did not shadow anything.

use super::alias::PointerAlias;
use super::CallFrame;
use rustc_hash::FxHashSet;
use serde::Serialize;

/// Kind of lexical scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Function,
    Block,
    LoopIteration,
}

/// One open scope and the symbols declared directly in it
#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    /// Loop identifier, for loop-iteration scopes
    pub loop_id: Option<u32>,
    /// 1-based iteration number, for loop-iteration scopes
    pub iteration: Option<u32>,
    declared: Vec<String>,
    members: FxHashSet<String>,
    /// Alias entries of outer symbols hidden by declarations in this scope
    shadowed: Vec<(String, Option<PointerAlias>)>,
}

impl Scope {
    pub fn new(kind: ScopeKind) -> Self {
        Scope {
            kind,
            loop_id: None,
            iteration: None,
            declared: Vec::new(),
            members: FxHashSet::default(),
            shadowed: Vec::new(),
        }
    }

    pub fn loop_iteration(loop_id: u32, iteration: u32) -> Self {
        Scope {
            loop_id: Some(loop_id),
            iteration: Some(iteration),
            ..Scope::new(ScopeKind::LoopIteration)
        }
    }

    /// Symbols declared directly in this scope, in declaration order
    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    fn is_iteration_of(&self, loop_id: u32) -> bool {
        self.kind == ScopeKind::LoopIteration && self.loop_id == Some(loop_id)
    }
}

/// A closed scope and the symbols it destroyed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeExit {
    pub kind: ScopeKind,
    pub destroyed: Vec<String>,
    pub loop_id: Option<u32>,
    pub iteration: Option<u32>,
}

impl From<Scope> for ScopeExit {
    fn from(scope: Scope) -> Self {
        ScopeExit {
            kind: scope.kind,
            destroyed: scope.declared,
            loop_id: scope.loop_id,
            iteration: scope.iteration,
        }
    }
}

/// Flatten closed scopes (innermost first) into one destroyed-symbol list
pub fn destroyed_symbols(exits: &[ScopeExit]) -> Vec<String> {
    exits
        .iter()
        .flat_map(|exit| exit.destroyed.iter().cloned())
        .collect()
}

impl CallFrame {
    /// Enter a block scope
    pub fn enter_block(&mut self) -> &Scope {
        self.enter_scope(Scope::new(ScopeKind::Block))
    }

    /// Enter the scope of one loop iteration
    pub fn enter_loop_iteration(&mut self, loop_id: u32, iteration: u32) -> &Scope {
        self.enter_scope(Scope::loop_iteration(loop_id, iteration))
    }

    /// Push an already built scope
    pub fn enter_scope(&mut self, scope: Scope) -> &Scope {
        self.scope_stack.push(scope);
        &self.scope_stack[self.scope_stack.len() - 1]
    }

    /// Exit the innermost scope. The function scope is never popped here.
    pub fn exit_scope(&mut self) -> Option<ScopeExit> {
        if self.scope_stack.len() <= 1 {
            return None;
        }
        let scope = self.scope_stack.pop()?;
        Some(self.retire(scope))
    }

    /// Close scopes down to and including the innermost one matching
    /// `target`, innermost first. Returns `None` (closing nothing) if no open
    /// block or loop-iteration scope matches.
    pub fn close_until<F>(&mut self, target: F) -> Option<Vec<ScopeExit>>
    where
        F: Fn(&Scope) -> bool,
    {
        let position = self
            .scope_stack
            .iter()
            .skip(1)
            .rposition(|scope| target(scope))?
            + 1;

        let mut exits = Vec::with_capacity(self.scope_stack.len() - position);
        while self.scope_stack.len() > position {
            if let Some(scope) = self.scope_stack.pop() {
                exits.push(self.retire(scope));
            }
        }
        Some(exits)
    }

    /// Close the innermost open block scope and anything nested in it
    pub fn close_block(&mut self) -> Option<Vec<ScopeExit>> {
        self.close_until(|scope| scope.kind == ScopeKind::Block)
    }

    /// Close the innermost open iteration scope of `loop_id` and anything nested in it
    pub fn close_loop_iteration(&mut self, loop_id: u32) -> Option<Vec<ScopeExit>> {
        self.close_until(|scope| scope.is_iteration_of(loop_id))
    }

    /// Force-close every scope including the function scope, innermost first
    pub fn close_all(&mut self) -> Vec<ScopeExit> {
        let scopes: Vec<Scope> = self.scope_stack.drain(..).rev().collect();
        scopes.into_iter().map(|scope| self.retire(scope)).collect()
    }

    /// Undo a closed scope's effect on the alias table
    fn retire(&mut self, mut scope: Scope) -> ScopeExit {
        let shadowed = std::mem::take(&mut scope.shadowed);
        for name in &scope.declared {
            if !shadowed.iter().any(|(hidden, _)| hidden == name) {
                self.aliases.remove(name);
            }
        }
        for (name, entry) in shadowed.into_iter().rev() {
            self.aliases.restore(&name, entry);
        }
        ScopeExit::from(scope)
    }

    /// Declare `name` in the innermost scope.
    ///
    /// Returns false, changing nothing, if it is already declared there.
    pub fn try_declare(&mut self, name: &str) -> bool {
        let Some(scope) = self.scope_stack.last_mut() else {
            return false;
        };
        if !scope.members.insert(name.to_string()) {
            return false;
        }
        scope.declared.push(name.to_string());
        true
    }

    /// Declare a symbol in the innermost scope, starting it with no alias.
    ///
    /// Returns false for a duplicate, like [`CallFrame::try_declare`]. When
    /// the name shadows a symbol of an enclosing scope, the outer alias
    /// entry is kept until the innermost scope closes.
    pub fn declare(&mut self, name: &str) -> bool {
        let shadows = self.is_declared(name);
        if !self.try_declare(name) {
            return false;
        }
        let previous = self.aliases.remove(name);
        if shadows {
            if let Some(scope) = self.scope_stack.last_mut() {
                scope.shadowed.push((name.to_string(), previous));
            }
        }
        true
    }

    /// Whether `name` is declared in any open scope of this frame
    pub fn is_declared(&self, name: &str) -> bool {
        self.scope_stack.iter().any(|scope| scope.contains(name))
    }

    /// Kind of the innermost open scope
    pub fn current_scope_kind(&self) -> Option<ScopeKind> {
        self.scope_stack.last().map(|scope| scope.kind)
    }

    /// Whether an iteration scope of `loop_id` is open
    pub fn has_loop_iteration(&self, loop_id: u32) -> bool {
        self.scope_stack.iter().any(|scope| scope.is_iteration_of(loop_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::alias::Target;
    use crate::frame::FrameStack;

    fn frame() -> CallFrame {
        let mut stack = FrameStack::new();
        stack.push_frame("main");
        stack.pop_frame().unwrap()
    }

    #[test]
    fn test_function_scope_is_base() {
        let mut f = frame();
        assert_eq!(f.scopes().len(), 1);
        assert_eq!(f.current_scope_kind(), Some(ScopeKind::Function));
        assert!(f.exit_scope().is_none());
        assert_eq!(f.scopes().len(), 1);
    }

    #[test]
    fn test_exit_reports_only_direct_symbols() {
        let mut f = frame();
        assert!(f.try_declare("outer"));
        f.enter_block();
        assert!(f.try_declare("inner"));
        assert!(f.try_declare("other"));

        let exit = f.exit_scope().unwrap();
        assert_eq!(exit.kind, ScopeKind::Block);
        assert_eq!(exit.destroyed, vec!["inner", "other"]);
        assert!(f.is_declared("outer"));
        assert!(!f.is_declared("inner"));
    }

    #[test]
    fn test_try_declare_is_idempotent_per_scope() {
        let mut f = frame();
        assert!(f.try_declare("x"));
        assert!(!f.try_declare("x"));
        assert_eq!(f.scopes()[0].declared(), ["x"]);

        // Shadowing in a nested scope is a fresh declaration
        f.enter_block();
        assert!(f.try_declare("x"));
    }

    #[test]
    fn test_shadowing_pointer_restores_outer_alias() {
        let mut f = frame();
        assert!(f.declare("a"));
        assert!(f.declare("p"));
        f.aliases
            .set_alias("p", Some(Target::Symbol("a".to_string())), false);

        f.enter_block();
        assert!(f.declare("p"));
        assert_eq!(f.aliases.resolve("p"), None);
        f.aliases
            .set_alias("p", Some(Target::Symbol("b".to_string())), false);
        assert!(f.declare("q"));
        f.aliases
            .set_alias("q", Some(Target::Symbol("a".to_string())), false);

        f.exit_scope().unwrap();
        assert_eq!(f.aliases.resolve("p"), Some(Target::Symbol("a".to_string())));
        // q went out of scope with its block
        assert!(!f.aliases.is_pointer("q"));
    }

    #[test]
    fn test_redeclare_in_same_scope_keeps_alias() {
        let mut f = frame();
        assert!(f.declare("p"));
        f.aliases
            .set_alias("p", Some(Target::Symbol("a".to_string())), false);
        assert!(!f.declare("p"));
        assert!(f.aliases.is_pointer("p"));
    }

    #[test]
    fn test_close_loop_iteration_closes_nested_blocks() {
        let mut f = frame();
        f.enter_loop_iteration(4, 1);
        f.try_declare("i");
        f.enter_block();
        f.try_declare("tmp");

        let exits = f.close_loop_iteration(4).unwrap();
        assert_eq!(exits.len(), 2);
        assert_eq!(exits[0].kind, ScopeKind::Block);
        assert_eq!(exits[1].iteration, Some(1));
        assert_eq!(destroyed_symbols(&exits), vec!["tmp", "i"]);
        assert_eq!(f.scopes().len(), 1);

        assert!(f.close_loop_iteration(4).is_none());
        assert!(f.close_block().is_none());
    }

    #[test]
    fn test_close_all_is_innermost_first() {
        let mut f = frame();
        f.try_declare("a");
        f.enter_block();
        f.try_declare("b");
        f.enter_loop_iteration(0, 3);
        f.try_declare("c");

        let exits = f.close_all();
        assert_eq!(destroyed_symbols(&exits), vec!["c", "b", "a"]);
        assert_eq!(exits.last().map(|e| e.kind), Some(ScopeKind::Function));
        assert!(f.scopes().is_empty());
    }
}
