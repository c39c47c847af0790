//! Compile-time symbol table: a tree of lexical scopes assigning slot
//! indices to local and global bindings.
//!
//! Binding is permissive, dynamic-language style: reading a name that no
//! scope defines is not an error (it compiles to a runtime global lookup),
//! and assigning to an undefined name implicitly declares it in the
//! currently active scope.

use indexmap::IndexMap;

/// Where a symbol lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Local,
    Global,
}

/// A named binding with its allocated slot index.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub index: usize,
    pub kind: SymbolKind,
}

/// One lexical scope. Scopes form a tree mirroring the nesting of the
/// source; the tree is retained after exit so sibling scopes never share
/// slot numbers.
#[derive(Debug)]
struct Scope {
    parent: Option<usize>,
    symbols: IndexMap<String, Symbol, ahash::RandomState>,
    children: Vec<usize>,
}

/// The scope stack. Local slots come from a monotonic counter that resets
/// only when control returns to the outermost (global) scope; globals use
/// their own counter that never resets.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    current: usize,
    local_counter: usize,
    global_counter: usize,
    local_high_water: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                parent: None,
                symbols: IndexMap::default(),
                children: Vec::new(),
            }],
            current: 0,
            local_counter: 0,
            global_counter: 0,
            local_high_water: 0,
        }
    }

    /// True when the active scope is the outermost (module) scope.
    pub fn at_global_scope(&self) -> bool {
        self.current == 0
    }

    pub fn enter_scope(&mut self) {
        let id = self.scopes.len();
        self.scopes.push(Scope {
            parent: Some(self.current),
            symbols: IndexMap::default(),
            children: Vec::new(),
        });
        self.scopes[self.current].children.push(id);
        self.current = id;
    }

    pub fn exit_scope(&mut self) {
        if let Some(parent) = self.scopes[self.current].parent {
            self.current = parent;
            if self.current == 0 {
                // Back at the outer boundary: slot numbers may be reused by
                // the next compilation from here on.
                self.local_high_water = self.local_high_water.max(self.local_counter);
                self.local_counter = 0;
            }
        }
    }

    /// Declare `name` in the active scope, allocating the next slot index.
    /// Re-declaring a name already present in the active scope returns the
    /// existing symbol.
    pub fn add_symbol(&mut self, name: &str) -> Symbol {
        if let Some(existing) = self.scopes[self.current].symbols.get(name) {
            return existing.clone();
        }

        let symbol = if self.at_global_scope() {
            let symbol = Symbol {
                name: name.to_string(),
                index: self.global_counter,
                kind: SymbolKind::Global,
            };
            self.global_counter += 1;
            symbol
        } else {
            let symbol = Symbol {
                name: name.to_string(),
                index: self.local_counter,
                kind: SymbolKind::Local,
            };
            self.local_counter += 1;
            symbol
        };

        self.scopes[self.current]
            .symbols
            .insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Find `name` searching innermost to outermost scope (shadowing).
    pub fn symbol_index(&self, name: &str) -> Option<Symbol> {
        let mut scope = self.current;
        loop {
            if let Some(symbol) = self.scopes[scope].symbols.get(name) {
                return Some(symbol.clone());
            }
            scope = self.scopes[scope].parent?;
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.symbol_index(name).is_some()
    }

    /// Current value of the local slot counter.
    pub fn local_count(&self) -> usize {
        self.local_counter
    }

    /// Largest local slot count any outer-boundary compilation reached.
    pub fn local_high_water(&self) -> usize {
        self.local_high_water.max(self.local_counter)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
