//! Trait boundaries to the translator and system bus.
//!
//! The translator shared object and the system bus are external
//! collaborators reached only through their interfaces. A harness with no
//! way to construct a fake of those interfaces can't exercise its
//! invariants without a real per-architecture `.so`, which this workspace
//! does not and should not vendor. `Translator`/`TranslatorCallbacks`/
//! `SystemBus` are the Rust encoding of "only the interface is known":
//! `harness-translator::NativeTranslator` is the one production
//! implementation (dlopen-backed); `harness-translator::mock::MockTranslator`
//! is a pure-Rust fake used by every test in this workspace.

use crate::mem_block::HostMemoryBlock;

/// The translator's native word size, part of the `.so` naming scheme
/// (`translate_<bits>-<architecture>-<be|le>.so`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    Bits32,
    Bits64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Facts about the guest CPU needed to resolve a translator shared object
/// and to report the public `Endianness`/`Model`/`Architecture` properties.
/// Guest ISA decoding itself is out of scope (Non-goal); this trait only
/// carries the identifying facts a front end already knows about itself.
pub trait GuestCpuFacts {
    fn word_size(&self) -> WordSize;
    fn architecture(&self) -> &'static str;
    fn endianness(&self) -> Endianness;
    fn model(&self) -> &'static str;
    fn cpu_type(&self) -> &'static str;
    fn registers(&self) -> &'static [crate::registers::RegisterDescriptor];
}

/// A memory access kind, used by `SystemBus::is_watchpoint_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// The system bus: a flat address space offering byte/word/dword
/// read/write and watchpoint queries. Out of scope beyond this interface.
pub trait SystemBus: Send {
    fn read_byte(&self, addr: u32) -> u8;
    fn read_word(&self, addr: u32) -> u16;
    fn read_dword(&self, addr: u32) -> u32;
    fn write_byte(&self, addr: u32, value: u8);
    fn write_word(&self, addr: u32, value: u16);
    fn write_dword(&self, addr: u32, value: u32);
    fn is_watchpoint_at(&self, addr: u32, access: AccessKind) -> bool;
    /// Resolves `addr` through the bus's Redirector, if it has one.
    /// `InitFromElf`/`InitFromUImage` consult this before setting PC to an
    /// image's entry point so a redirected region (e.g. a boot-ROM shadow)
    /// is honored. Buses with no Redirector return `None` for every
    /// address, the default.
    fn resolve_redirect(&self, _addr: u64) -> Option<u64> {
        None
    }
}

/// Sentinel panic payload used by `Translator::restart_translation_block`
/// and `ClockSource::advance`'s cancellation path. Both are "this call
/// never returns normally" signals and both are caught with
/// `std::panic::catch_unwind` at their single call site inside the
/// execution loop — see `harness-exec::loop_`.
pub struct RestartTranslationBlock;

/// The *imports* the harness binds on the translator: calls the managed
/// side makes into the native translator.
///
/// Methods mirror the C ABI one-to-one, with Rust types substituted for
/// raw pointers wherever the buffer's lifetime is caller-owned.
pub trait Translator: Send {
    /// Returns `Err` if the CPU type is unknown (native `init` returning
    /// -1).
    fn init(&mut self, cpu_type: &str) -> Result<(), crate::error::CpuError>;
    fn dispose(&mut self);
    fn reset(&mut self);
    /// Runs guest code, chaining translation blocks until the translator
    /// yields. Returns one of `EXEC_BREAKPOINT`/`EXEC_HALTED`/`EXEC_YIELD`
    /// or an architecture-specific exception code.
    fn execute(&mut self) -> i32;
    /// Unwinds out of the current translation block and forces a
    /// single-instruction retranslation at the current PC. Never returns
    /// normally — see `RestartTranslationBlock`.
    fn restart_translation_block(&self) -> ! {
        std::panic::panic_any(RestartTranslationBlock)
    }
    fn set_paused(&mut self);
    fn clear_paused(&mut self);
    fn is_wfi(&self) -> bool;
    /// Current guest program counter, used for breakpoint dispatch and
    /// symbol-name refresh by the execution loop.
    fn get_pc(&self) -> u64;
    /// Overwrite the guest program counter, so `InitFromElf`/
    /// `InitFromUImage` can redirect a freshly constructed CPU to an
    /// image's entry point without the harness having to synthesize an
    /// opaque state blob by hand. A per-architecture translator shared
    /// object built against this harness must export it alongside its
    /// other imports.
    fn set_pc(&mut self, pc: u64);
    fn get_page_size(&self) -> u32;
    fn map_range(&mut self, start: u32, size: u32);
    fn unmap_range(&mut self, start: u32, end: u32);
    fn is_range_mapped(&self, start: u32, end: u32) -> bool;
    fn invalidate_translation_blocks(&mut self, start: u32, end: u32);
    fn translate_to_physical(&self, addr: u32) -> u32;
    fn set_host_blocks(&mut self, blocks: &[HostMemoryBlock]);
    fn free_host_blocks(&mut self);
    fn set_count_threshold(&mut self, threshold: i32);
    fn set_irq(&mut self, line: i32, level: i32);
    fn is_irq_set(&self) -> bool;
    fn add_breakpoint(&mut self, addr: u32);
    fn remove_breakpoint(&mut self, addr: u32);
    fn attach_log_block_fetch(&mut self, enabled: bool);
    fn set_on_block_translation_enabled(&mut self, enabled: bool);
    fn set_translation_cache_size(&mut self, size: usize);
    fn invalidate_translation_cache(&mut self);
    fn set_max_block_size(&mut self, size: u32) -> u32;
    fn get_max_block_size(&self) -> u32;
    fn restore_context(&mut self);
    /// Copies the translator's opaque state blob out. Length is whatever
    /// the native `get_state_size` reported at the time of the call.
    fn export_state(&self) -> Vec<u8>;
    /// Restores a previously exported state blob.
    fn import_state(&mut self, blob: &[u8]);
}

/// The *exports* the translator calls back into managed code: bus I/O,
/// symbol lookup, abort reporting, and the allocator trampolines.
///
/// Implemented by `harness-exec`'s execution loop state and reached
/// through a thread-local "current CPU" pointer set for the duration of
/// each `Translator::execute` call — the translator is single-entrant per
/// CPU, so one thread-local slot per OS thread is sufficient and avoids
/// any global mutable state.
pub trait TranslatorCallbacks {
    fn read_byte_from_bus(&self, addr: u32) -> u32;
    fn read_word_from_bus(&self, addr: u32) -> u32;
    fn read_dword_from_bus(&self, addr: u32) -> u32;
    fn write_byte_to_bus(&self, addr: u32, value: u32);
    fn write_word_to_bus(&self, addr: u32, value: u32);
    fn write_dword_to_bus(&self, addr: u32, value: u32);
    fn on_block_begin(&self, pc: u32, flags: u32);
    fn report_abort(&self, message: &str);
    fn is_io_accessed(&self, addr: u32) -> bool;
    fn update_instruction_counter(&self, delta: i32);
    fn is_instruction_count_enabled(&self) -> bool;
    fn is_block_begin_event_enabled(&self) -> bool;
    fn touch_host_block(&self, offset: u32);
    fn invalidate_tb_in_other_cpus(&self, start: u32, end: u32);
    fn allocate(&self, size: usize) -> usize;
    fn reallocate(&self, ptr: usize, size: usize) -> usize;
    fn free(&self, ptr: usize);
    fn log_as_cpu(&self, level: i32, message: &str);
    fn log_disassembly(&self, pc: u32, len: u32, flags: u32);
    fn get_cpu_index(&self) -> i32;
    fn on_translation_cache_size_change(&self, new_size: i32);
}
