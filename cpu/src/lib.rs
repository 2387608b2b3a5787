//! The Public CPU Contract: `TranslationCpu`, the single type a front end
//! constructs and drives.
//!
//! Assembles every other `harness-*` crate into one runnable thing, the
//! way `linux-user/src/main.rs` wires `RiscvCpu` + `cpu_exec_loop` +
//! `load_elf` + syscall emulation into a process — generalized here to be
//! architecture-agnostic (`T: Translator`, `B: SystemBus`, `F:
//! GuestCpuFacts` instead of one hardcoded RISC-V front end) and with the
//! Linux-ABI process emulation left out, since guest syscall emulation is
//! out of scope.

pub mod loader;
pub mod lookup;

use std::sync::Arc;

use harness_core::traits::{GuestCpuFacts, SystemBus, Translator};
use harness_core::{CpuConfig, CpuError, ExecutionMode, HaltArguments, RegisterDescriptor};
use harness_disas::DisassemblerRegistry;
use harness_exec::ExecutionLoop;
use harness_hooks::HookHandle;
use harness_snapshot::{Snapshot, SnapshotHooks};

pub use lookup::SymbolTable;

/// The CPU instance a front end owns: an `ExecutionLoop` (the state
/// machine and thread), the guest's static facts, a disassembler registry
/// and a symbol table for logging/lookup. Generic the same way
/// `ExecutionLoop` is, plus `F: GuestCpuFacts` for the identity facts a
/// front end declares once at construction.
pub struct TranslationCpu<T: Translator, B: SystemBus, F: GuestCpuFacts> {
    exec: Arc<ExecutionLoop<T, B>>,
    facts: F,
    disassemblers: DisassemblerRegistry,
    disassembler_slot: std::sync::Mutex<Option<String>>,
    symbols: std::sync::Mutex<SymbolTable>,
}

impl<T: Translator, B: SystemBus, F: GuestCpuFacts> TranslationCpu<T, B, F> {
    pub fn new(
        translator: T,
        bus: B,
        facts: F,
        cfg: &CpuConfig,
        decode_interrupt: fn(u32) -> i32,
        num_irq_lines: usize,
        slot: i32,
    ) -> Self {
        Self {
            exec: Arc::new(ExecutionLoop::new(translator, bus, cfg, decode_interrupt, num_irq_lines, slot)),
            facts,
            disassemblers: DisassemblerRegistry::with_defaults(),
            disassembler_slot: std::sync::Mutex::new(cfg.disassembler.clone()),
            symbols: std::sync::Mutex::new(SymbolTable::new()),
        }
    }

    /// Binds the translator shared object for `facts.cpu_type()` and
    /// applies the config's cache/block-size/count-threshold settings.
    /// Must run once, before any image is loaded.
    pub fn init(&self) -> Result<(), CpuError> {
        self.exec.init(self.facts.cpu_type())
    }

    // ---- identity (read-only, fixed at construction) ----

    pub fn endianness(&self) -> harness_core::traits::Endianness {
        self.facts.endianness()
    }

    pub fn model(&self) -> &'static str {
        self.facts.model()
    }

    pub fn architecture(&self) -> &'static str {
        self.facts.architecture()
    }

    pub fn registers(&self) -> &'static [RegisterDescriptor] {
        self.facts.registers()
    }

    pub fn slot(&self) -> i32 {
        self.exec.slot()
    }

    // ---- events ----

    pub fn on_halted(&self, cb: Box<dyn Fn(HaltArguments) + Send>) {
        self.exec.on_halted(cb);
    }

    pub fn on_is_halted_changed(&self, cb: Box<dyn Fn(bool) + Send>) {
        self.exec.on_is_halted_changed(cb);
    }

    // ---- properties ----

    pub fn pc(&self) -> u64 {
        self.exec.pc()
    }

    pub fn set_pc(&self, pc: u64) {
        self.exec.set_pc(pc);
    }

    pub fn is_started(&self) -> bool {
        self.exec.is_started()
    }

    pub fn is_halted(&self) -> bool {
        self.exec.is_halted()
    }

    pub fn executed_instructions(&self) -> u64 {
        self.exec.executed_instructions()
    }

    pub fn performance_in_mips(&self) -> u32 {
        self.exec.performance_in_mips()
    }

    pub fn set_performance_in_mips(&self, mips: u32) {
        self.exec.set_performance_in_mips(mips);
    }

    pub fn translation_cache_size(&self) -> usize {
        self.exec.translation_cache_size()
    }

    pub fn set_translation_cache_size(&self, size: usize) {
        self.exec.set_translation_cache_size(size);
    }

    pub fn maximum_block_size(&self) -> u32 {
        self.exec.maximum_block_size()
    }

    pub fn set_maximum_block_size(&self, size: u32) {
        self.exec.set_maximum_block_size(size);
    }

    pub fn count_threshold(&self) -> i32 {
        self.exec.count_threshold()
    }

    pub fn set_count_threshold(&self, threshold: i32) {
        self.exec.set_count_threshold(threshold);
    }

    pub fn advance_immediately(&self) -> bool {
        self.exec.advance_immediately()
    }

    pub fn set_advance_immediately(&self, value: bool) {
        self.exec.set_advance_immediately(value);
    }

    pub fn thread_sentinel_enabled(&self) -> bool {
        self.exec.thread_sentinel_enabled()
    }

    pub fn set_thread_sentinel_enabled(&self, value: bool) {
        self.exec.set_thread_sentinel_enabled(value);
    }

    pub fn disable_interrupts_while_stepping(&self) -> bool {
        self.exec.disable_interrupts_while_stepping()
    }

    pub fn set_disable_interrupts_while_stepping(&self, value: bool) {
        self.exec.set_disable_interrupts_while_stepping(value);
    }

    pub fn update_context_on_load_and_store(&self) -> bool {
        self.exec.update_context_on_load_and_store()
    }

    pub fn set_update_context_on_load_and_store(&self, value: bool) {
        self.exec.set_update_context_on_load_and_store(value);
    }

    pub fn log_translation_block_fetch(&self) -> bool {
        self.exec.log_translation_block_fetch()
    }

    pub fn set_log_translation_block_fetch(&self, value: bool) {
        self.exec.set_log_translation_block_fetch(value);
    }

    pub fn log_translated_blocks(&self) -> bool {
        self.exec.log_translated_blocks()
    }

    pub fn set_log_translated_blocks(&self, value: bool) {
        self.exec.set_log_translated_blocks(value);
    }

    pub fn log_file(&self) -> Option<String> {
        self.exec.log_file()
    }

    pub fn set_log_file(&self, path: Option<String>) {
        self.exec.set_log_file(path);
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.exec.execution_mode()
    }

    pub fn set_execution_mode(&self, mode: ExecutionMode) {
        self.exec.set_execution_mode(mode);
    }

    /// All IRQ lines as a bool-per-line snapshot. There is no single
    /// scalar `IRQ` register in the ABI this harness binds to — interrupts
    /// are a bank of independently latched lines, so the property is a
    /// `Vec<bool>` rather than a bitmask integer.
    pub fn irq(&self) -> Vec<bool> {
        self.exec.irq_latches()
    }

    pub fn is_irq_set(&self) -> bool {
        self.exec.is_irq_set()
    }

    pub fn is_set_event(&self, line: u32) -> bool {
        self.exec.is_set_event(line)
    }

    /// The clock source, for peripheral devices outside this crate to
    /// register their own timers against.
    pub fn clock(&self) -> &harness_clock::ClockSource {
        self.exec.clock()
    }

    pub fn add_clock_entry(&self, handler: fn(&mut harness_clock::ClockEntryState), tag: u64, period: u64, enabled: bool) {
        self.exec.add_clock_entry(handler, tag, period, enabled);
    }

    /// Sets or clears the named disassembler as the one `log_disassembly`
    /// consults. `None` deregisters it, leaving plain addresses in logs.
    pub fn set_disassembler(&self, name: Option<&str>) {
        *self.disassembler_slot.lock().unwrap() = name.map(str::to_string);
    }

    // ---- operations ----

    pub fn map_memory(&self, starting_offset: u32, size: u32, host_pointer: usize) -> Result<(), CpuError> {
        self.exec.map_memory(starting_offset, size, host_pointer)
    }

    pub fn unmap_memory(&self, start: u32, end: u32) -> Result<(), CpuError> {
        self.exec.unmap_memory(start, end)
    }

    pub fn set_page_access_via_io(&self, addr: u32) {
        self.exec.set_page_access_via_io(addr);
    }

    pub fn clear_page_access_via_io(&self, addr: u32) {
        self.exec.clear_page_access_via_io(addr);
    }

    pub fn add_hook(&self, addr: u32, cb: Arc<dyn Fn(u32) + Send + Sync>) -> HookHandle {
        self.exec.add_hook(addr, cb)
    }

    pub fn remove_hook(&self, addr: u32, handle: HookHandle) {
        self.exec.remove_hook(addr, handle);
    }

    pub fn remove_all_at(&self, addr: u32) {
        self.exec.remove_all_at(addr);
    }

    pub fn on_gpio(&self, line: u32, level: bool) {
        self.exec.on_gpio(line, level);
    }

    /// `Step` requires `ExecutionMode::SingleStep`; runs `count` more
    /// instructions and blocks until every one of them has retired.
    pub fn step(&self, count: u64) -> Result<(), CpuError> {
        self.exec.step(count)
    }

    pub fn reset(&self) {
        self.exec.reset();
    }

    /// `Start` and `Resume` are the same operation: spawning the CPU
    /// thread if it is not already running.
    pub fn start(&self) {
        self.exec.resume();
    }

    pub fn resume(&self) {
        self.exec.resume();
    }

    pub fn pause(&self) {
        self.exec.pause();
    }

    pub fn dispose(&self) {
        self.exec.dispose();
    }

    // ---- image loading ----

    pub fn init_from_elf(&self, bytes: &[u8]) -> Result<u64, CpuError> {
        loader::load_elf(bytes, &self.facts, &self.exec)
    }

    pub fn init_from_uimage(&self, bytes: &[u8]) -> Result<u64, CpuError> {
        loader::load_uimage(bytes, &self.facts, &self.exec)
    }

    // ---- disassembly / symbol lookup ----

    pub fn available_disassemblers(&self) -> Vec<String> {
        self.disassemblers.available()
    }

    pub fn register_disassembler(&self, name: &str, disassembler: Arc<dyn harness_disas::Disassembler>) {
        self.disassemblers.register(name, disassembler);
    }

    pub fn disassembler(&self, name: &str) -> Option<Arc<dyn harness_disas::Disassembler>> {
        self.disassemblers.get(name)
    }

    pub fn insert_symbol(&self, addr: u64, name: impl Into<String>) {
        self.symbols.lock().unwrap().insert(addr, name);
    }

    pub fn lookup_symbol(&self, addr: u64) -> String {
        self.symbols.lock().unwrap().lookup(addr)
    }

    // ---- snapshot & lifecycle ----

    /// The subset of properties a `CpuConfig` round-trips, read back from
    /// the live instance.
    fn current_config(&self) -> CpuConfig {
        CpuConfig {
            translation_cache_size: self.exec.translation_cache_size(),
            maximum_block_size: self.exec.maximum_block_size(),
            count_threshold: self.exec.count_threshold(),
            performance_in_mips: self.exec.performance_in_mips(),
            advance_immediately: self.exec.advance_immediately(),
            thread_sentinel_enabled: self.exec.thread_sentinel_enabled(),
            disable_interrupts_while_stepping: self.exec.disable_interrupts_while_stepping(),
            update_context_on_load_and_store: self.exec.update_context_on_load_and_store(),
            log_translation_block_fetch: self.exec.log_translation_block_fetch(),
            log_translated_blocks: self.exec.log_translated_blocks(),
            log_file: self.exec.log_file(),
            disassembler: self.disassembler_slot.lock().unwrap().clone(),
        }
    }

    fn apply_config(&self, cfg: &CpuConfig) {
        self.exec.set_translation_cache_size(cfg.translation_cache_size);
        self.exec.set_maximum_block_size(cfg.maximum_block_size);
        self.exec.set_count_threshold(cfg.count_threshold);
        self.exec.set_performance_in_mips(cfg.performance_in_mips);
        self.exec.set_advance_immediately(cfg.advance_immediately);
        self.exec.set_thread_sentinel_enabled(cfg.thread_sentinel_enabled);
        self.exec.set_disable_interrupts_while_stepping(cfg.disable_interrupts_while_stepping);
        self.exec.set_update_context_on_load_and_store(cfg.update_context_on_load_and_store);
        self.exec.set_log_translation_block_fetch(cfg.log_translation_block_fetch);
        self.exec.set_log_translated_blocks(cfg.log_translated_blocks);
        self.exec.set_log_file(cfg.log_file.clone());
        *self.disassembler_slot.lock().unwrap() = cfg.disassembler.clone();
    }

    /// Pauses (if running), calls `hooks.before_save()`, and serializes the
    /// config, IRQ latches, and the translator's opaque state blob.
    /// Transient state (mapped segments, breakpoints, the thread itself)
    /// is deliberately excluded — see `harness_snapshot`'s module doc.
    pub fn export_snapshot(&self, hooks: &dyn SnapshotHooks) -> Result<Vec<u8>, CpuError> {
        if self.exec.is_started() && !self.exec.is_halted() {
            self.exec.pause();
        }
        hooks.before_save();
        let snapshot = Snapshot::new(self.current_config(), self.exec.irq_latches(), self.exec.export_translator_state());
        snapshot.to_bytes()
    }

    /// Late-post-deserialization: captures every currently mapped segment
    /// (before `init` wipes the memory-map registry), reloads the
    /// translator, restores its opaque state, re-maps every captured
    /// segment against the fresh translator instance, re-arms every
    /// breakpoint the (untouched) hook table still knows about, restores
    /// IRQ latches, and finally calls `hooks.after_load()`.
    pub fn import_snapshot(&self, bytes: &[u8], hooks: &dyn SnapshotHooks) -> Result<(), CpuError> {
        let snapshot = Snapshot::from_bytes(bytes)?;
        let segments = self.exec.mapped_segments();

        self.exec.init(self.facts.cpu_type())?;
        self.apply_config(&snapshot.config);
        self.exec.import_translator_state(&snapshot.translator_state);

        for (starting_offset, size, host_pointer) in segments {
            self.exec.map_memory(starting_offset, size, host_pointer)?;
        }
        for addr in self.exec.breakpoint_addresses() {
            self.exec.rearm_breakpoint(addr);
        }
        self.exec.restore_irq_latches(&snapshot.irq_latches);

        hooks.after_load();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::traits::AccessKind;
    use harness_core::WordSize;
    use harness_translator::mock::MockTranslator;
    use std::sync::atomic::{AtomicI32, Ordering};

    struct RiscV64Facts;
    impl GuestCpuFacts for RiscV64Facts {
        fn word_size(&self) -> WordSize {
            WordSize::Bits64
        }
        fn architecture(&self) -> &'static str {
            "riscv64"
        }
        fn endianness(&self) -> harness_core::traits::Endianness {
            harness_core::traits::Endianness::Little
        }
        fn model(&self) -> &'static str {
            "generic-rv64"
        }
        fn cpu_type(&self) -> &'static str {
            "riscv64"
        }
        fn registers(&self) -> &'static [RegisterDescriptor] {
            &[]
        }
    }

    struct FlatBus;
    impl SystemBus for FlatBus {
        fn read_byte(&self, _addr: u32) -> u8 {
            0
        }
        fn read_word(&self, _addr: u32) -> u16 {
            0
        }
        fn read_dword(&self, _addr: u32) -> u32 {
            0
        }
        fn write_byte(&self, _addr: u32, _value: u8) {}
        fn write_word(&self, _addr: u32, _value: u16) {}
        fn write_dword(&self, _addr: u32, _value: u32) {}
        fn is_watchpoint_at(&self, _addr: u32, _access: AccessKind) -> bool {
            false
        }
    }

    fn new_cpu() -> TranslationCpu<MockTranslator, FlatBus, RiscV64Facts> {
        let cfg = CpuConfig::default();
        let translator = MockTranslator::new(0);
        let cpu = TranslationCpu::new(translator, FlatBus, RiscV64Facts, &cfg, |line| line as i32, 4, 0);
        cpu.init().unwrap();
        cpu
    }

    #[test]
    fn identity_facts_are_exposed_verbatim() {
        let cpu = new_cpu();
        assert_eq!(cpu.architecture(), "riscv64");
        assert_eq!(cpu.model(), "generic-rv64");
        assert!(matches!(cpu.endianness(), harness_core::traits::Endianness::Little));
    }

    #[test]
    fn default_registry_offers_riscv64() {
        let cpu = new_cpu();
        assert_eq!(cpu.available_disassemblers(), vec!["riscv64".to_string()]);
        assert!(cpu.disassembler("riscv64").is_some());
    }

    #[test]
    fn symbol_lookup_round_trips_through_the_cpu() {
        let cpu = new_cpu();
        cpu.insert_symbol(0x4000, "handler");
        assert_eq!(cpu.lookup_symbol(0x4000), "handler");
        assert_eq!(cpu.lookup_symbol(0x5000), "0x5000");
    }

    #[test]
    fn snapshot_round_trip_preserves_config_and_restores_segments() {
        let cpu = new_cpu();
        cpu.set_count_threshold(777);
        cpu.set_log_file(Some("cpu0.log".to_string()));

        let ptr = cpu.exec.allocate_host_memory(0x1000);
        cpu.map_memory(0x2000, 0x1000, ptr).unwrap();

        struct NoopHooks;
        impl SnapshotHooks for NoopHooks {}

        let bytes = cpu.export_snapshot(&NoopHooks).unwrap();
        cpu.import_snapshot(&bytes, &NoopHooks).unwrap();

        assert_eq!(cpu.count_threshold(), 777);
        assert_eq!(cpu.log_file(), Some("cpu0.log".to_string()));
        assert_eq!(cpu.exec.mapped_segments(), vec![(0x2000, 0x1000, ptr)]);
    }

    #[test]
    fn breakpoint_survives_a_snapshot_round_trip() {
        let cpu = new_cpu();
        let hits = Arc::new(AtomicI32::new(0));
        let hits_cb = Arc::clone(&hits);
        cpu.add_hook(0x1000, Arc::new(move |_pc| { hits_cb.fetch_add(1, Ordering::SeqCst); }));

        struct NoopHooks;
        impl SnapshotHooks for NoopHooks {}
        let bytes = cpu.export_snapshot(&NoopHooks).unwrap();
        cpu.import_snapshot(&bytes, &NoopHooks).unwrap();

        assert_eq!(cpu.exec.breakpoint_addresses(), vec![0x1000]);
    }
}
