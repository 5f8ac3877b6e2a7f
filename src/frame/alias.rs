//! Pointer alias tables
//!
//! Each frame keeps an [`AliasTable`] mapping a pointer name to what it
//! currently points at: another symbol, a heap cell, or nothing known.
//!
//! Resolution follows chains (`q = p; p = &a` resolves `q` to `a`) with a
//! visited set, so a cyclic table ends the walk instead of looping. A pointer
//! never resolves to itself: self-targets are stored as unknown, and a walk
//! that would come back to its start reports a cycle.

use crate::event::Address;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::debug;

/// What a pointer ultimately refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// A stack symbol, found by name
    Symbol(String),
    /// A stack symbol found by address, with the frame that owns its storage
    Slot { name: String, frame_id: String },
    /// A heap cell, with its address when the tracer reported one
    Heap(Option<Address>),
}

impl Target {
    pub fn symbol_name(&self) -> Option<&str> {
        match self {
            Target::Symbol(name) | Target::Slot { name, .. } => Some(name),
            Target::Heap(_) => None,
        }
    }

    /// Owning frame, when the target was pinned by address
    pub fn frame_id(&self) -> Option<&str> {
        match self {
            Target::Slot { frame_id, .. } => Some(frame_id),
            Target::Symbol(_) | Target::Heap(_) => None,
        }
    }

    pub fn is_heap(&self) -> bool {
        matches!(self, Target::Heap(_))
    }

    pub fn heap_address(&self) -> Option<Address> {
        match self {
            Target::Heap(addr) => *addr,
            Target::Symbol(_) | Target::Slot { .. } => None,
        }
    }
}

/// Alias entry for one pointer in one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerAlias {
    /// `None` when the target is unknown
    pub target: Option<Target>,
    pub decayed_from_array: bool,
}

/// Outcome of walking an alias chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Walk {
    Found(Target),
    Unresolved,
    /// The chain came back to the named pointer
    Cycle(String),
}

impl Walk {
    pub fn target(self) -> Option<Target> {
        match self {
            Walk::Found(target) => Some(target),
            Walk::Unresolved | Walk::Cycle(_) => None,
        }
    }
}

/// Pointer aliases visible in one frame
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: FxHashMap<String, PointerAlias>,
}

impl AliasTable {
    /// Record what `pointer` now points at
    pub fn set_alias(&mut self, pointer: &str, target: Option<Target>, decayed_from_array: bool) {
        let target = match target {
            Some(Target::Symbol(name)) if name == pointer => {
                debug!("ignoring self-alias of '{}'", pointer);
                None
            }
            other => other,
        };
        self.entries.insert(
            pointer.to_string(),
            PointerAlias {
                target,
                decayed_from_array,
            },
        );
    }

    pub fn get(&self, pointer: &str) -> Option<&PointerAlias> {
        self.entries.get(pointer)
    }

    /// Forget a pointer, e.g. when its name is declared afresh
    pub fn remove(&mut self, pointer: &str) -> Option<PointerAlias> {
        self.entries.remove(pointer)
    }

    /// Put back an entry saved by [`AliasTable::remove`]
    pub fn restore(&mut self, pointer: &str, entry: Option<PointerAlias>) {
        match entry {
            Some(entry) => {
                self.entries.insert(pointer.to_string(), entry);
            }
            None => {
                self.entries.remove(pointer);
            }
        }
    }

    /// Whether `name` has ever been given an alias in this table
    pub fn is_pointer(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Walk the alias chain starting at `pointer` within this table
    pub fn walk(&self, pointer: &str) -> Walk {
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        visited.insert(pointer);
        let mut current = pointer;

        loop {
            let Some(entry) = self.entries.get(current) else {
                // `current` is not a pointer, so it is the referent
                return if current == pointer {
                    Walk::Unresolved
                } else {
                    Walk::Found(Target::Symbol(current.to_string()))
                };
            };
            match &entry.target {
                None => return Walk::Unresolved,
                Some(Target::Heap(addr)) => return Walk::Found(Target::Heap(*addr)),
                // An address names the storage itself
                Some(slot @ Target::Slot { .. }) => return Walk::Found(slot.clone()),
                Some(Target::Symbol(next)) => {
                    if !visited.insert(next.as_str()) {
                        return Walk::Cycle(next.clone());
                    }
                    current = next.as_str();
                }
            }
        }
    }

    /// Resolve `pointer` within this table only
    pub fn resolve(&self, pointer: &str) -> Option<Target> {
        self.walk(pointer).target()
    }
}

/// Resolve `pointer` against each table in turn, innermost frame first.
///
/// The first table that yields a target wins. If none does, the result is
/// [`Walk::Cycle`] when any table contained a cycle, else [`Walk::Unresolved`].
pub fn resolve_across<'a, I>(tables: I, pointer: &str) -> Walk
where
    I: IntoIterator<Item = &'a AliasTable>,
{
    let mut cycle = None;
    for table in tables {
        match table.walk(pointer) {
            Walk::Found(target) => return Walk::Found(target),
            Walk::Cycle(name) => {
                cycle.get_or_insert(name);
            }
            Walk::Unresolved => {}
        }
    }
    match cycle {
        Some(name) => Walk::Cycle(name),
        None => Walk::Unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(name: &str) -> Option<Target> {
        Some(Target::Symbol(name.to_string()))
    }

    #[test]
    fn test_chain_resolves_to_final_symbol() {
        let mut table = AliasTable::default();
        table.set_alias("p", symbol("a"), false);
        table.set_alias("q", symbol("p"), false);

        assert_eq!(table.resolve("q"), symbol("a"));
        assert_eq!(table.resolve("p"), symbol("a"));
    }

    #[test]
    fn test_self_alias_is_stored_unresolved() {
        let mut table = AliasTable::default();
        table.set_alias("p", symbol("p"), false);
        assert!(table.is_pointer("p"));
        assert_eq!(table.get("p").unwrap().target, None);
        assert_eq!(table.resolve("p"), None);
    }

    #[test]
    fn test_cycle_stops() {
        let mut table = AliasTable::default();
        table.set_alias("p", symbol("q"), false);
        table.set_alias("q", symbol("r"), false);
        table.set_alias("r", symbol("p"), false);

        assert_eq!(table.walk("p"), Walk::Cycle("p".to_string()));
        assert_eq!(table.resolve("q"), None);
    }

    #[test]
    fn test_heap_target_and_unknown_pointer() {
        let mut table = AliasTable::default();
        table.set_alias("buf", Some(Target::Heap(Some(0x1000))), false);
        table.set_alias("view", symbol("buf"), false);
        table.set_alias("dangling", None, false);

        assert_eq!(table.resolve("view"), Some(Target::Heap(Some(0x1000))));
        assert_eq!(table.resolve("dangling"), None);
        assert_eq!(table.resolve("never_seen"), None);
    }

    #[test]
    fn test_slot_target_keeps_its_frame() {
        let slot = Target::Slot {
            name: "x".to_string(),
            frame_id: "main-0".to_string(),
        };
        let mut table = AliasTable::default();
        table.set_alias("p", Some(slot.clone()), false);
        table.set_alias("q", symbol("p"), false);
        // A local pointer named like the slot must not extend the chain
        table.set_alias("x", symbol("y"), false);

        assert_eq!(table.resolve("q"), Some(slot.clone()));
        assert_eq!(slot.symbol_name(), Some("x"));
        assert_eq!(slot.frame_id(), Some("main-0"));
    }

    #[test]
    fn test_restore_puts_back_removed_entry() {
        let mut table = AliasTable::default();
        table.set_alias("p", symbol("a"), false);

        let saved = table.remove("p");
        table.set_alias("p", symbol("b"), false);
        table.restore("p", saved);
        assert_eq!(table.resolve("p"), symbol("a"));

        table.restore("p", None);
        assert!(!table.is_pointer("p"));
    }

    #[test]
    fn test_resolve_across_prefers_innermost() {
        let mut outer = AliasTable::default();
        outer.set_alias("p", symbol("a"), false);
        outer.set_alias("r", symbol("b"), false);

        let mut inner = AliasTable::default();
        inner.set_alias("p", symbol("c"), false);
        inner.set_alias("r", None, false);

        assert_eq!(resolve_across([&inner, &outer], "p").target(), symbol("c"));
        // Unknown in the inner frame falls back to the outer one
        assert_eq!(resolve_across([&inner, &outer], "r").target(), symbol("b"));
        assert_eq!(resolve_across([&inner, &outer], "z"), Walk::Unresolved);
    }
}
