//! Symbol and scope table for the single-pass compiler.
//!
//! The table is a flat, append-only list. Lookups scan for the live entry with
//! the greatest scope depth, so an inner declaration shadows an outer one for
//! as long as it is in the table. Leaving a function body truncates the tail,
//! which is what keeps the address counters below correct.

use tracing::debug;

/// Scope depth of top-level declarations. Every nested scope is deeper.
pub const GLOBAL_SCOPE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Integer,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolKind::Function => write!(f, "function"),
            SymbolKind::Integer => write!(f, "variable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub scope: usize,
    /// Byte offset for functions, global slot for globals, frame-relative
    /// slot for locals.
    pub address: usize,
    /// Parameter list; empty unless `kind` is `Function`.
    pub params: Vec<Symbol>,
}

impl Symbol {
    pub fn integer(name: impl Into<String>, scope: usize, address: usize) -> Self {
        Symbol {
            name: name.into(),
            kind: SymbolKind::Integer,
            scope,
            address,
            params: Vec::new(),
        }
    }

    pub fn function(name: impl Into<String>, scope: usize, address: usize) -> Self {
        Symbol {
            name: name.into(),
            kind: SymbolKind::Function,
            scope,
            address,
            params: Vec::new(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.scope == GLOBAL_SCOPE
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, symbol: Symbol) {
        debug!(
            name = %symbol.name,
            kind = %symbol.kind,
            scope = symbol.scope,
            address = symbol.address,
            "declare"
        );
        self.symbols.push(symbol);
    }

    /// The nearest enclosing declaration of `name`. Among entries with equal
    /// depth the earliest wins.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        let mut found: Option<&Symbol> = None;
        for symbol in &self.symbols {
            if symbol.name == name && found.is_none_or(|f| symbol.scope > f.scope) {
                found = Some(symbol);
            }
        }
        found
    }

    /// Whether `name` is already declared at exactly `scope`.
    pub fn is_declared_in(&self, name: &str, scope: usize) -> bool {
        self.symbols
            .iter()
            .any(|s| s.name == name && s.scope == scope)
    }

    /// Drop every trailing entry deeper than `depth`.
    pub fn exit_scope(&mut self, depth: usize) {
        let before = self.symbols.len();
        while self.symbols.last().is_some_and(|s| s.scope > depth) {
            self.symbols.pop();
        }
        debug!(depth, dropped = before - self.symbols.len(), "exit scope");
    }

    /// Next free global-table slot, counted over the live table.
    pub fn next_global_address(&self) -> usize {
        self.symbols
            .iter()
            .filter(|s| s.scope == GLOBAL_SCOPE && s.kind == SymbolKind::Integer)
            .count()
    }

    /// Next free frame-relative slot, counted over the live table.
    pub fn next_local_address(&self) -> usize {
        self.symbols
            .iter()
            .filter(|s| s.scope != GLOBAL_SCOPE && s.kind == SymbolKind::Integer)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_missing() {
        let table = SymbolTable::new();
        assert!(table.lookup("x").is_none());
    }

    #[test]
    fn test_inner_scope_shadows_outer() {
        let mut table = SymbolTable::new();
        table.declare(Symbol::integer("x", GLOBAL_SCOPE, 0));
        table.declare(Symbol::function("main", GLOBAL_SCOPE, 7));
        table.declare(Symbol::integer("x", GLOBAL_SCOPE + 1, 0));

        let x = table.lookup("x").unwrap();
        assert_eq!(x.scope, GLOBAL_SCOPE + 1);
        assert!(!x.is_global());

        table.exit_scope(GLOBAL_SCOPE);
        let x = table.lookup("x").unwrap();
        assert!(x.is_global());
        assert_eq!(table.symbols.len(), 2);
    }

    #[test]
    fn test_equal_depth_earliest_wins() {
        let mut table = SymbolTable::new();
        table.declare(Symbol::integer("x", GLOBAL_SCOPE, 0));
        table.declare(Symbol::integer("x", GLOBAL_SCOPE, 1));
        assert_eq!(table.lookup("x").unwrap().address, 0);
    }

    #[test]
    fn test_global_addresses_are_sequential() {
        let mut table = SymbolTable::new();
        assert_eq!(table.next_global_address(), 0);
        table.declare(Symbol::integer("a", GLOBAL_SCOPE, 0));
        table.declare(Symbol::function("f", GLOBAL_SCOPE, 12));
        assert_eq!(table.next_global_address(), 1);
        table.declare(Symbol::integer("b", GLOBAL_SCOPE, 1));
        assert_eq!(table.next_global_address(), 2);
    }

    #[test]
    fn test_local_addresses_reset_after_scope_exit() {
        let mut table = SymbolTable::new();
        table.declare(Symbol::integer("g", GLOBAL_SCOPE, 0));
        table.declare(Symbol::function("f", GLOBAL_SCOPE, 7));
        table.declare(Symbol::integer("a", 2, 0));
        table.declare(Symbol::integer("b", 2, 1));
        assert_eq!(table.next_local_address(), 2);

        table.exit_scope(GLOBAL_SCOPE);
        assert_eq!(table.next_local_address(), 0);
        assert_eq!(table.next_global_address(), 1);
    }

    #[test]
    fn test_exit_scope_only_truncates_tail() {
        let mut table = SymbolTable::new();
        table.declare(Symbol::integer("a", 2, 0));
        table.declare(Symbol::integer("g", GLOBAL_SCOPE, 0));
        table.exit_scope(GLOBAL_SCOPE);
        // "a" is not at the tail, so it survives.
        assert_eq!(table.symbols.len(), 2);
    }

    #[test]
    fn test_is_declared_in() {
        let mut table = SymbolTable::new();
        table.declare(Symbol::integer("x", GLOBAL_SCOPE, 0));
        assert!(table.is_declared_in("x", GLOBAL_SCOPE));
        assert!(!table.is_declared_in("x", 2));
    }
}
