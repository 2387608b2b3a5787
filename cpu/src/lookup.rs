//! Symbol-name lookup for logging.
//!
//! `SymbolTable::lookup` returns the symbol name when one is known for an
//! address, falling back to the hex address otherwise — never both, and
//! never concatenated.

use std::collections::BTreeMap;

/// A flat address-to-name map, the kind a front end builds once from an
/// image's symbol table (e.g. an ELF `.symtab`) and hands to the CPU for
/// block-begin / breakpoint logging. Lookup is by exact address only —
/// no range/containment search — a symbol name when one is present,
/// rather than a disassembler-grade nearest-symbol resolver.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    names: BTreeMap<u64, String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self { names: BTreeMap::new() }
    }

    pub fn insert(&mut self, addr: u64, name: impl Into<String>) {
        self.names.insert(addr, name.into());
    }

    /// The symbol name at `addr` if known, else `0x{addr:x}`.
    pub fn lookup(&self, addr: u64) -> String {
        match self.names.get(&addr) {
            Some(name) => name.clone(),
            None => format!("0x{addr:x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_address_returns_name_only() {
        let mut table = SymbolTable::new();
        table.insert(0x1000, "_start");
        assert_eq!(table.lookup(0x1000), "_start");
    }

    #[test]
    fn unknown_address_falls_back_to_hex() {
        let table = SymbolTable::new();
        assert_eq!(table.lookup(0x2000), "0x2000");
    }

    #[test]
    fn fallback_is_not_concatenated_with_a_name() {
        // Regression test for the precedence bug: the fallback must be
        // exactly the hex address, never `"0x…" + name` or `name + "0x…"`.
        let mut table = SymbolTable::new();
        table.insert(0x3000, "other_symbol");
        let looked_up = table.lookup(0x4000);
        assert_eq!(looked_up, "0x4000");
        assert!(!looked_up.contains("other_symbol"));
    }
}
