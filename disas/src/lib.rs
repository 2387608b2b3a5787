//! The disassembler plugin surface: a trait any guest-ISA disassembler
//! implements, plus a name-keyed registry backing the `Disassembler`/
//! `AvailableDisassemblers` properties.
//!
//! `riscv::Rv64Disassembler` is the one shipped implementation, wrapping
//! `print_insn_riscv64` behind the trait.

pub mod registry;
pub mod riscv;

pub use registry::DisassemblerRegistry;

/// One guest-ISA disassembler. `disassemble` decodes the instruction at
/// `pc` from the front of `bytes` and returns its assembly text plus
/// length in bytes — `print_insn_riscv64(pc, data) -> (String, usize)`'s
/// own signature, generalized to a trait so more than one guest
/// architecture can be registered side by side.
pub trait Disassembler: Send + Sync {
    fn disassemble(&self, pc: u64, bytes: &[u8]) -> (String, usize);
}
