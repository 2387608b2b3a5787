//! Shared data model and trait boundaries for the translation CPU harness.
//!
//! Every other `harness-*` crate depends on this one. It owns nothing that
//! runs on its own: no thread, no translator, no bus. It exists so that the
//! execution loop, the memory registry, the hook table and the public CPU
//! contract can all agree on the same vocabulary of types without any of
//! them depending on each other directly.

pub mod config;
pub mod error;
pub mod execution_mode;
pub mod halt;
pub mod mem_block;
pub mod registers;
pub mod segment;
pub mod traits;

pub use config::CpuConfig;
pub use error::CpuError;
pub use execution_mode::ExecutionMode;
pub use halt::{HaltArguments, HaltReason};
pub use mem_block::HostMemoryBlock;
pub use registers::{RegisterDescriptor, RegisterWidth};
pub use segment::{MappedSegment, SegmentMapping};
pub use traits::{AccessKind, Endianness, GuestCpuFacts, SystemBus, Translator, TranslatorCallbacks, WordSize};

/// Sentinel values returned from `Translator::execute`.
pub const EXEC_BREAKPOINT: i32 = 0x10002;
pub const EXEC_HALTED: i32 = 0x10003;
pub const EXEC_YIELD: i32 = 0;
