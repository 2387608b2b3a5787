use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::riscv::Rv64Disassembler;
use crate::Disassembler;

/// Name-keyed registry backing the `Disassembler`/`AvailableDisassemblers`
/// public properties. Grounded on `harness-hooks::HookTable`'s
/// `Mutex`-guarded map discipline, generalized from an address key to a
/// plugin name.
pub struct DisassemblerRegistry {
    entries: Mutex<HashMap<String, Arc<dyn Disassembler>>>,
}

impl DisassemblerRegistry {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// A registry with the one disassembler the pack ships pre-registered
    /// under `"riscv64"`. Dropping it would leave `AvailableDisassemblers`
    /// vacuously empty.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("riscv64", Arc::new(Rv64Disassembler));
        registry
    }

    pub fn register(&self, name: &str, disassembler: Arc<dyn Disassembler>) {
        self.entries.lock().unwrap().insert(name.to_string(), disassembler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Disassembler>> {
        self.entries.lock().unwrap().get(name).cloned()
    }

    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DisassemblerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
