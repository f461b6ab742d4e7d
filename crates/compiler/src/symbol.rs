//! Chained-scope symbol table used by the parser and typechecker.
//!
//! `spec.md` §3 "scope": lexical, block-structured; a lookup walks from the
//! innermost scope outward. Each binding records its declared mutability so
//! the typechecker can reject assignment to a non-`mut` variable (E0594).

use orus_core::types::Type;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Binding {
    pub ty: Type,
    pub mutable: bool,
    /// Slot assigned by codegen once register allocation runs; absent
    /// while still in the symbol/typecheck stage.
    pub register: Option<u16>,
}

#[derive(Debug, Default)]
struct Scope {
    bindings: HashMap<String, Binding>,
}

/// A stack of lexical scopes. Scope 0 is the module/global scope and is
/// never popped.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope::default()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pops the innermost scope. Panics if called on the global scope;
    /// that is a caller bug (unbalanced push/pop), not a user-facing error.
    pub fn pop_scope(&mut self) {
        assert!(self.scopes.len() > 1, "cannot pop the global scope");
        self.scopes.pop();
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Declares a binding in the innermost scope, shadowing any outer
    /// binding of the same name. Returns the previous binding if this name
    /// was already declared in *this* scope (a redeclaration, which the
    /// caller may choose to reject).
    pub fn declare(&mut self, name: impl Into<String>, ty: Type, mutable: bool) -> Option<Binding> {
        self.scopes
            .last_mut()
            .expect("global scope always present")
            .bindings
            .insert(name.into(), Binding { ty, mutable, register: None })
    }

    /// Looks up a name starting from the innermost scope outward.
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.bindings.get(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.bindings.get_mut(name))
    }

    /// True if `name` is declared in the innermost scope specifically
    /// (used to detect shadowing-by-redeclaration within one block).
    pub fn declared_in_current_scope(&self, name: &str) -> bool {
        self.scopes
            .last()
            .expect("global scope always present")
            .bindings
            .contains_key(name)
    }

    pub fn is_global_scope(&self) -> bool {
        self.scopes.len() == 1
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scope_shadows_outer() {
        let mut table = SymbolTable::new();
        table.declare("x", Type::i32(), false);
        table.push_scope();
        table.declare("x", Type::string(), true);
        assert_eq!(table.lookup("x").unwrap().ty, Type::string());
        table.pop_scope();
        assert_eq!(table.lookup("x").unwrap().ty, Type::i32());
    }

    #[test]
    fn lookup_walks_outward_through_unrelated_scopes() {
        let mut table = SymbolTable::new();
        table.declare("g", Type::bool(), false);
        table.push_scope();
        table.push_scope();
        assert!(table.lookup("g").is_some());
        assert!(!table.declared_in_current_scope("g"));
    }

    #[test]
    fn redeclaration_in_same_scope_returns_previous_binding() {
        let mut table = SymbolTable::new();
        assert!(table.declare("x", Type::i32(), false).is_none());
        let previous = table.declare("x", Type::i64(), false);
        assert!(previous.is_some());
    }

    #[test]
    #[should_panic]
    fn popping_the_global_scope_panics() {
        let mut table = SymbolTable::new();
        table.pop_scope();
    }
}
