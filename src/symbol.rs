//! Interned symbol table.
//!
//! Each distinct symbol text maps to exactly one [`SymbolId`], so symbol
//! equality is an integer comparison and `same` can treat two occurrences of
//! `foo` as the same identity.

use string_interner::{DefaultBackend, DefaultSymbol, StringInterner};

/// Handle for an interned symbol name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SymbolId(DefaultSymbol);

/// Symbols the evaluator and bootstrap refer to by name.
#[derive(Debug, Clone, Copy)]
pub struct WellKnown {
    pub quote: SymbolId,
    pub globals: SymbolId,
    pub this: SymbolId,
    pub pair: SymbolId,
    pub symbol: SymbolId,
    pub integer: SymbolId,
    pub lambda: SymbolId,
    pub macro_: SymbolId,
    pub native: SymbolId,
    pub cons: SymbolId,
    pub ffi_library: SymbolId,
    pub ffi_function: SymbolId,
}

pub struct SymbolTable {
    interner: StringInterner<DefaultBackend>,
    well_known: WellKnown,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut interner = StringInterner::<DefaultBackend>::new();
        let mut intern = |name: &str| SymbolId(interner.get_or_intern(name));
        let well_known = WellKnown {
            quote: intern("quote"),
            globals: intern("GLOBALS"),
            this: intern("this"),
            pair: intern("PAIR"),
            symbol: intern("SYMBOL"),
            integer: intern("S64"),
            lambda: intern("LAMBDA"),
            macro_: intern("MACRO"),
            native: intern("NATIVE_FUNCTION"),
            cons: intern("CONS"),
            ffi_library: intern("FFI_LIBRARY"),
            ffi_function: intern("FFI_FUNCTION"),
        };
        SymbolTable {
            interner,
            well_known,
        }
    }

    /// Intern a symbol name. Returns the existing id if already interned.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        SymbolId(self.interner.get_or_intern(name))
    }

    /// Look up a symbol id by name, without interning.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.interner.get(name).map(SymbolId)
    }

    /// The text of an interned symbol.
    pub fn name(&self, id: SymbolId) -> &str {
        self.interner.resolve(id.0).unwrap_or("")
    }

    pub fn well_known(&self) -> &WellKnown {
        &self.well_known
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_returns_same_id_for_same_text() {
        let mut table = SymbolTable::new();
        assert_eq!(table.lookup("lambda-list"), None);
        let a = table.intern("lambda-list");
        let b = table.intern("lambda-list");
        assert_eq!(a, b);
        assert_eq!(table.lookup("lambda-list"), Some(a));
        assert_eq!(table.name(a), "lambda-list");
        assert_ne!(a, table.intern("lambda-lis"));
    }

    #[test]
    fn test_well_known_symbols_are_preinterned() {
        let mut table = SymbolTable::new();
        let quote = table.well_known().quote;
        assert_eq!(table.intern("quote"), quote);
        assert_eq!(table.lookup("GLOBALS"), Some(table.well_known().globals));
        assert_eq!(table.lookup("never-seen"), None);
        assert_eq!(table.name(quote), "quote");
    }
}
