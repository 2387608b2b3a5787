//! The execution loop and state machine: the CPU thread's one function,
//! the pause/resume/step protocol, and the `TranslatorCallbacks` wiring
//! that lets the translator call back into this same state.
//!
//! Named `loop_` because `loop` is a keyword.

use std::cell::UnsafeCell;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use harness_clock::{AdvanceCancelled, ClockSource};
use harness_core::traits::{AccessKind, RestartTranslationBlock, SystemBus, Translator, TranslatorCallbacks};
use harness_core::{CpuConfig, CpuError, ExecutionMode, HaltArguments, HaltReason, EXEC_BREAKPOINT};
use harness_hooks::{HookHandle, HookTable, PauseGuard};
use harness_irq::InterruptPlane;
use harness_mem::{MemoryManager, MemoryMapRegistry};

use crate::sync::{ManualResetEvent, StepGate, WakeSet};

type HaltedCallback = Box<dyn Fn(HaltArguments) + Send>;
type IsHaltedChangedCallback = Box<dyn Fn(bool) + Send>;

/// Owns the whole CPU instance plus the loop-private bookkeeping
/// (`skip_next_stepping`, `advance_should_be_restarted`,
/// `watchpoint_resume_pending`). Generic over `T: Translator`, `B:
/// SystemBus` so the same loop drives `NativeTranslator` in production and
/// `MockTranslator` under test.
pub struct ExecutionLoop<T: Translator, B: SystemBus> {
    translator: UnsafeCell<T>,
    bus: B,
    mem: Mutex<MemoryMapRegistry>,
    mem_manager: MemoryManager,
    irq: InterruptPlane,
    hooks: HookTable,
    clock: ClockSource,
    pause_guard: PauseGuard,
    slot: i32,

    cpu_thread: Mutex<Option<JoinHandle<()>>>,
    cpu_thread_id: Mutex<Option<ThreadId>>,
    pause_lock: Mutex<()>,
    pause_event: ManualResetEvent,
    wake: WakeSet,
    step_gate: StepGate,

    mode: Mutex<ExecutionMode>,
    is_halted: Mutex<bool>,
    is_started: AtomicBool,
    skip_next_stepping: AtomicBool,
    advance_should_be_restarted: AtomicBool,
    watchpoint_resume_pending: AtomicBool,
    saved_max_block_size: Mutex<Option<u32>>,

    executed_instructions: AtomicU64,
    performance_in_mips: AtomicU32,
    translation_cache_size: AtomicUsize,
    max_block_size: AtomicU32,
    count_threshold: AtomicI32,
    advance_immediately: AtomicBool,
    thread_sentinel_enabled: AtomicBool,
    disable_interrupts_while_stepping: AtomicBool,
    update_context_on_load_and_store: AtomicBool,
    log_translation_block_fetch: AtomicBool,
    log_translated_blocks: AtomicBool,
    log_file: Mutex<Option<String>>,

    halted_callbacks: Mutex<Vec<HaltedCallback>>,
    is_halted_changed_callbacks: Mutex<Vec<IsHaltedChangedCallback>>,
}

// SAFETY: the translator is single-entrant per CPU (only the CPU thread
// ever calls `execute`); every other call reaches it either while the
// machine is in its paused state or through one of the narrowly-scoped
// control exports (`set_paused`, `set_irq`, `add_breakpoint`,
// `remove_breakpoint`) that a translator shared object must support while
// `execute` is in flight on another thread — these are intrinsically safe
// by construction. `UnsafeCell` is used instead of a
// `Mutex` because the CPU thread's own re-entrant calls (through the
// `TranslatorCallbacks` exports, on the same call stack as `execute`)
// would self-deadlock a plain lock; this mirrors `exec/src/lib.rs`'s own
// `SharedState::code_buf: UnsafeCell<CodeBuffer>`.
unsafe impl<T: Translator, B: SystemBus> Sync for ExecutionLoop<T, B> {}

impl<T: Translator, B: SystemBus> ExecutionLoop<T, B> {
    pub fn new(translator: T, bus: B, cfg: &CpuConfig, decode_interrupt: fn(u32) -> i32, num_irq_lines: usize, slot: i32) -> Self {
        Self {
            translator: UnsafeCell::new(translator),
            bus,
            mem: Mutex::new(MemoryMapRegistry::new(0x1000)),
            mem_manager: MemoryManager::new(),
            irq: InterruptPlane::new(num_irq_lines, decode_interrupt),
            hooks: HookTable::new(),
            clock: ClockSource::new(),
            pause_guard: PauseGuard::new(),
            slot,

            cpu_thread: Mutex::new(None),
            cpu_thread_id: Mutex::new(None),
            pause_lock: Mutex::new(()),
            pause_event: ManualResetEvent::new(true),
            wake: WakeSet::new(),
            step_gate: StepGate::new(),

            mode: Mutex::new(ExecutionMode::Continuous),
            is_halted: Mutex::new(false),
            is_started: AtomicBool::new(false),
            skip_next_stepping: AtomicBool::new(true),
            advance_should_be_restarted: AtomicBool::new(false),
            watchpoint_resume_pending: AtomicBool::new(false),
            saved_max_block_size: Mutex::new(None),

            executed_instructions: AtomicU64::new(0),
            performance_in_mips: AtomicU32::new(cfg.performance_in_mips),
            translation_cache_size: AtomicUsize::new(cfg.translation_cache_size),
            max_block_size: AtomicU32::new(cfg.maximum_block_size),
            count_threshold: AtomicI32::new(cfg.count_threshold),
            advance_immediately: AtomicBool::new(cfg.advance_immediately),
            thread_sentinel_enabled: AtomicBool::new(cfg.thread_sentinel_enabled),
            disable_interrupts_while_stepping: AtomicBool::new(cfg.disable_interrupts_while_stepping),
            update_context_on_load_and_store: AtomicBool::new(cfg.update_context_on_load_and_store),
            log_translation_block_fetch: AtomicBool::new(cfg.log_translation_block_fetch),
            log_translated_blocks: AtomicBool::new(cfg.log_translated_blocks),
            log_file: Mutex::new(cfg.log_file.clone()),

            halted_callbacks: Mutex::new(Vec::new()),
            is_halted_changed_callbacks: Mutex::new(Vec::new()),
        }
    }

    fn translator_ref(&self) -> &T {
        // SAFETY: see the `unsafe impl Sync` justification above.
        unsafe { &*self.translator.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn translator_mut(&self) -> &mut T {
        // SAFETY: see the `unsafe impl Sync` justification above.
        unsafe { &mut *self.translator.get() }
    }

    /// Binds the translator's `init`, then pushes the configured cache
    /// size, max block size, and count threshold that `new` only recorded
    /// locally.
    ///
    /// Takes `&self` rather than `&mut self` so late-post-deserialization
    /// can re-run it through the same `Arc<ExecutionLoop<_>>` the rest of
    /// the harness already shares, reloading the translator library without
    /// requiring exclusive ownership.
    pub fn init(&self, cpu_type: &str) -> Result<(), CpuError> {
        self.translator_mut().init(cpu_type)?;
        let page_size = self.translator_mut().get_page_size();
        *self.mem.lock().unwrap() = MemoryMapRegistry::new(page_size);
        self.translator_mut().set_translation_cache_size(self.translation_cache_size.load(Ordering::Relaxed));
        self.translator_mut().set_max_block_size(self.max_block_size.load(Ordering::Relaxed));
        self.translator_mut().set_count_threshold(self.count_threshold.load(Ordering::Relaxed));
        Ok(())
    }

    fn on_cpu_thread(&self) -> bool {
        self.cpu_thread_id
            .lock()
            .unwrap()
            .map(|id| id == thread::current().id())
            .unwrap_or(false)
    }

    fn fire_halted(&self, reason: HaltReason) {
        let pc = self.translator_ref().get_pc();
        let args = HaltArguments::new(reason, pc);
        for cb in self.halted_callbacks.lock().unwrap().iter() {
            cb(args);
        }
    }

    fn set_is_halted_and_notify(&self, halted: bool) {
        let mut changed = false;
        self.wake.notify_after(|| {
            let mut guard = self.is_halted.lock().unwrap();
            if *guard != halted {
                *guard = halted;
                changed = true;
            }
        });
        if !changed {
            return;
        }
        for cb in self.is_halted_changed_callbacks.lock().unwrap().iter() {
            cb(halted);
        }
    }

    pub fn on_halted(&self, cb: HaltedCallback) {
        self.halted_callbacks.lock().unwrap().push(cb);
    }

    pub fn on_is_halted_changed(&self, cb: IsHaltedChangedCallback) {
        self.is_halted_changed_callbacks.lock().unwrap().push(cb);
    }

    // ---- public control surface ----

    pub fn pc(&self) -> u64 {
        self.translator_ref().get_pc()
    }

    /// Only meaningful while the machine is paused (used by
    /// `InitFromElf`/`InitFromUImage` before the first `Resume`).
    pub fn set_pc(&self, pc: u64) {
        self.translator_mut().set_pc(pc);
    }

    pub fn is_started(&self) -> bool {
        self.is_started.load(Ordering::SeqCst)
    }

    pub fn is_halted(&self) -> bool {
        *self.is_halted.lock().unwrap()
    }

    /// Setting to `true` fires `Halted(Pause)` before the transition is
    /// otherwise observed; setting back to `false` signals the wake event
    /// instead.
    pub fn set_is_halted(&self, halted: bool) {
        self.set_is_halted_and_notify(halted);
        if halted {
            self.fire_halted(HaltReason::Pause);
        }
    }

    pub fn executed_instructions(&self) -> u64 {
        self.executed_instructions.load(Ordering::Relaxed)
    }

    pub fn performance_in_mips(&self) -> u32 {
        self.performance_in_mips.load(Ordering::Relaxed)
    }

    pub fn set_performance_in_mips(&self, mips: u32) {
        self.performance_in_mips.store(mips, Ordering::Relaxed);
    }

    pub fn translation_cache_size(&self) -> usize {
        self.translation_cache_size.load(Ordering::Relaxed)
    }

    pub fn set_translation_cache_size(&self, size: usize) {
        self.translation_cache_size.store(size, Ordering::Relaxed);
        self.translator_mut().set_translation_cache_size(size);
    }

    /// While `SingleStep` is active the translator's own max block size is
    /// pinned at 1 by `adjust_block_size`; the caller-meaningful value is
    /// the one stashed in `saved_max_block_size` for that duration.
    pub fn maximum_block_size(&self) -> u32 {
        self.saved_max_block_size
            .lock()
            .unwrap()
            .unwrap_or_else(|| self.max_block_size.load(Ordering::Relaxed))
    }

    pub fn set_maximum_block_size(&self, size: u32) {
        let mut saved = self.saved_max_block_size.lock().unwrap();
        if saved.is_some() {
            *saved = Some(size);
        } else {
            self.max_block_size.store(size, Ordering::Relaxed);
            self.translator_mut().set_max_block_size(size);
        }
    }

    pub fn count_threshold(&self) -> i32 {
        self.count_threshold.load(Ordering::Relaxed)
    }

    pub fn set_count_threshold(&self, threshold: i32) {
        self.count_threshold.store(threshold, Ordering::Relaxed);
        self.translator_mut().set_count_threshold(threshold);
    }

    pub fn advance_immediately(&self) -> bool {
        self.advance_immediately.load(Ordering::Relaxed)
    }

    pub fn set_advance_immediately(&self, value: bool) {
        self.advance_immediately.store(value, Ordering::Relaxed);
    }

    pub fn thread_sentinel_enabled(&self) -> bool {
        self.thread_sentinel_enabled.load(Ordering::Relaxed)
    }

    pub fn set_thread_sentinel_enabled(&self, value: bool) {
        self.thread_sentinel_enabled.store(value, Ordering::Relaxed);
    }

    pub fn disable_interrupts_while_stepping(&self) -> bool {
        self.disable_interrupts_while_stepping.load(Ordering::Relaxed)
    }

    pub fn set_disable_interrupts_while_stepping(&self, value: bool) {
        self.disable_interrupts_while_stepping.store(value, Ordering::Relaxed);
    }

    pub fn update_context_on_load_and_store(&self) -> bool {
        self.update_context_on_load_and_store.load(Ordering::Relaxed)
    }

    pub fn set_update_context_on_load_and_store(&self, value: bool) {
        self.update_context_on_load_and_store.store(value, Ordering::Relaxed);
    }

    pub fn log_translation_block_fetch(&self) -> bool {
        self.log_translation_block_fetch.load(Ordering::Relaxed)
    }

    pub fn set_log_translation_block_fetch(&self, value: bool) {
        self.log_translation_block_fetch.store(value, Ordering::Relaxed);
        self.translator_mut().attach_log_block_fetch(value);
    }

    pub fn log_translated_blocks(&self) -> bool {
        self.log_translated_blocks.load(Ordering::Relaxed)
    }

    pub fn set_log_translated_blocks(&self, value: bool) {
        self.log_translated_blocks.store(value, Ordering::Relaxed);
        self.translator_mut().set_on_block_translation_enabled(value);
    }

    pub fn log_file(&self) -> Option<String> {
        self.log_file.lock().unwrap().clone()
    }

    pub fn set_log_file(&self, path: Option<String>) {
        *self.log_file.lock().unwrap() = path;
    }

    pub fn is_irq_set(&self) -> bool {
        self.translator_ref().is_irq_set()
    }

    pub fn slot(&self) -> i32 {
        self.slot
    }

    /// The clock source, shared with whatever peripheral devices register
    /// timers against this CPU. Peripherals live outside this crate, but
    /// they still need a handle to add/remove entries — this is that
    /// handle. Adding the first entry invalidates the translation cache,
    /// since `is_instruction_count_enabled` now returns `true` and
    /// previously translated blocks assumed it didn't.
    pub fn clock(&self) -> &harness_clock::ClockSource {
        &self.clock
    }

    /// Adds a clock entry and invalidates the translation cache if this
    /// was the empty-to-non-empty transition.
    pub fn add_clock_entry(&self, handler: fn(&mut harness_clock::ClockEntryState), tag: u64, period: u64, enabled: bool) {
        if self.clock.add(handler, tag, period, enabled) {
            self.translator_mut().invalidate_translation_cache();
        }
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        *self.mode.lock().unwrap()
    }

    pub fn set_execution_mode(&self, mode: ExecutionMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn map_memory(&self, starting_offset: u32, size: u32, host_pointer: usize) -> Result<(), CpuError> {
        let mut mem = self.mem.lock().unwrap();
        mem.map(starting_offset, size, host_pointer, self.translator_mut())?;
        let total = mem.total_mapped_bytes();
        self.translation_cache_size.store((total / 4) as usize, Ordering::Relaxed);
        Ok(())
    }

    pub fn unmap_memory(&self, start: u32, end: u32) -> Result<(), CpuError> {
        self.mem.lock().unwrap().unmap(start, end, self.translator_mut())
    }

    pub fn set_page_access_via_io(&self, addr: u32) {
        self.mem.lock().unwrap().set_page_access_via_io(addr);
    }

    pub fn clear_page_access_via_io(&self, addr: u32) {
        self.mem.lock().unwrap().clear_page_access_via_io(addr);
    }

    pub fn add_hook(&self, addr: u32, cb: Arc<dyn Fn(u32) + Send + Sync>) -> HookHandle {
        self.hooks.add_hook(addr, cb, self.translator_mut())
    }

    pub fn remove_hook(&self, addr: u32, handle: HookHandle) {
        self.hooks.remove_hook(addr, handle, self.translator_mut())
    }

    pub fn remove_all_at(&self, addr: u32) {
        self.hooks.remove_all_at(addr, self.translator_mut())
    }

    pub fn set_hook_at_block_begin(&self, cb: Option<Arc<dyn Fn(u32, u32) + Send + Sync>>) {
        if self.hooks.set_hook_at_block_begin(cb) {
            self.translator_mut().invalidate_translation_cache();
        }
    }

    pub fn on_gpio(&self, line: u32, level: bool) {
        let started = self.is_started();
        let stepping_gated =
            self.disable_interrupts_while_stepping.load(Ordering::SeqCst) && self.execution_mode() == ExecutionMode::SingleStep;
        let on_cpu_thread = self.on_cpu_thread();
        self.wake.notify_after(|| {
            self.irq.on_gpio(line, level, started, stepping_gated, on_cpu_thread, self.translator_mut());
        });
    }

    pub fn is_set_event(&self, line: u32) -> bool {
        self.irq.is_set(line)
    }

    /// Requires `ExecutionMode::SingleStep`; resets the step-done
    /// countdown to `count`, releases the step semaphore by `count`, and
    /// waits for every release to be accounted for.
    pub fn step(&self, count: u64) -> Result<(), CpuError> {
        if self.execution_mode() != ExecutionMode::SingleStep {
            return Err(CpuError::StepOutsideSingleStep);
        }
        let _guard = self.pause_lock.lock().unwrap();
        self.step_gate.release_and_wait(count);
        Ok(())
    }

    pub fn reset(&self) {
        self.translator_mut().reset();
        self.executed_instructions.store(0, Ordering::SeqCst);
        self.clock.eject_all();
        self.set_is_halted_and_notify(false);
    }

    pub fn resume(self: &Arc<Self>) {
        let _guard = self.pause_lock.lock().unwrap();
        if !self.pause_event.is_set() {
            return;
        }
        self.pause_event.reset();
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("harness-cpu-{}", self.slot))
            .spawn(move || {
                *this.cpu_thread_id.lock().unwrap() = Some(thread::current().id());
                this.set_is_halted_and_notify(false);
                this.run_once();
            })
            .expect("failed to spawn CPU thread");
        *self.cpu_thread.lock().unwrap() = Some(handle);
        self.translator_mut().clear_paused();
        self.is_started.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.pause_with_reason(HaltReason::Pause);
    }

    fn pause_with_reason(&self, reason: HaltReason) {
        if self.pause_event.is_set() {
            return;
        }
        let _guard = self.pause_lock.lock().unwrap();
        self.wake.notify_after(|| {
            self.pause_event.set();
            self.translator_mut().set_paused();
        });

        if !self.on_cpu_thread() {
            // Unblock a possibly-sleeping HandleStepping so the CPU thread
            // can observe the pause event and return.
            self.step_gate.release_one_and_drain();
            if let Some(handle) = self.cpu_thread.lock().unwrap().take() {
                handle.join().expect("CPU thread panicked");
            }
            *self.cpu_thread_id.lock().unwrap() = None;
            self.translator_mut().clear_paused();
        } else {
            self.pause_guard.order_pause();
        }
        self.fire_halted(reason);
    }

    /// Pause (as an abort) if not already paused, remove every installed
    /// hook, tear down the translator, free host blocks, and assert the
    /// memory manager leaked nothing. Unloading the shared object and
    /// deleting its temporary file happens when `T` itself drops
    /// (`NativeTranslator`'s `Drop` impl), once this `ExecutionLoop` is
    /// dropped.
    pub fn dispose(&self) {
        if !self.pause_event.is_set() {
            self.pause_with_reason(HaltReason::Abort);
        }
        for addr in self.hooks.breakpoint_addresses() {
            self.hooks.remove_all_at(addr, self.translator_mut());
        }
        self.translator_mut().dispose();
        self.translator_mut().free_host_blocks();
        self.mem_manager.assert_empty();
    }

    // ---- snapshot support ----

    /// Copies the translator's opaque state blob out — the pre-serialization
    /// half of a snapshot.
    pub fn export_translator_state(&self) -> Vec<u8> {
        self.translator_ref().export_state()
    }

    /// Restores a previously exported state blob. Must run after `init` has
    /// reloaded the translator library.
    pub fn import_translator_state(&self, blob: &[u8]) {
        self.translator_mut().import_state(blob);
    }

    /// Every mapped segment as `(starting_offset, size, host_pointer)` —
    /// used to replay `map_memory` against a freshly reloaded translator
    /// during late-post-deserialization.
    pub fn mapped_segments(&self) -> Vec<(u32, u32, usize)> {
        self.mem
            .lock()
            .unwrap()
            .segments()
            .iter()
            .map(|s| (s.segment.starting_offset, s.segment.size, s.segment.host_pointer))
            .collect()
    }

    /// Samples every IRQ latch to a bool array — the other half of a
    /// pre-serialization snapshot.
    pub fn irq_latches(&self) -> Vec<bool> {
        self.irq.latches_snapshot()
    }

    /// Rebuilds the IRQ latches from a previously saved array.
    pub fn restore_irq_latches(&self, saved: &[bool]) {
        self.irq.restore_latches(saved);
    }

    /// Every address currently holding at least one hook callback —
    /// re-pushed to the freshly reloaded translator as `add_breakpoint`
    /// calls during late-post-deserialization, since the Rust-side
    /// `HookTable` survives a snapshot untouched but the new translator
    /// instance starts with none set.
    pub fn breakpoint_addresses(&self) -> Vec<u32> {
        self.hooks.breakpoint_addresses()
    }

    /// Re-arms a single breakpoint address on the translator without
    /// touching the hook table itself.
    pub fn rearm_breakpoint(&self, addr: u32) {
        self.translator_mut().add_breakpoint(addr);
    }

    /// Allocates `size` bytes of host memory through the same
    /// `MemoryManager` backing the translator's `allocate` export — used by
    /// `InitFromElf`/`InitFromUImage` to materialize `PT_LOAD` segment
    /// content before mapping it.
    pub fn allocate_host_memory(&self, size: usize) -> usize {
        self.mem_manager.allocate(size)
    }

    pub fn free_host_memory(&self, ptr: usize) {
        self.mem_manager.free(ptr)
    }

    pub fn guest_page_size(&self) -> u32 {
        self.translator_ref().get_page_size()
    }

    /// Resolves `addr` through the system bus's Redirector, if it has one.
    /// `InitFromElf`/`InitFromUImage` consult this before calling `set_pc`.
    pub fn resolve_redirect(&self, addr: u64) -> Option<u64> {
        self.bus.resolve_redirect(addr)
    }

    fn handle_stepping(&self) {
        if self.execution_mode() != ExecutionMode::SingleStep {
            return;
        }
        if self.skip_next_stepping.load(Ordering::SeqCst) {
            return;
        }
        self.fire_halted(HaltReason::Step);
        self.step_gate.wait_for_token_and_signal_done();
    }

    /// AdjustBlockSize: bypasses `set_maximum_block_size`'s public wrapper
    /// (which would itself try to consult `saved_max_block_size`) and talks
    /// to the translator directly to avoid recursing into itself.
    fn adjust_block_size(&self) {
        let mode = self.execution_mode();
        let mut saved = self.saved_max_block_size.lock().unwrap();
        match mode {
            ExecutionMode::SingleStep if saved.is_none() => {
                let current = self.max_block_size.load(Ordering::Relaxed);
                *saved = Some(current);
                self.translator_mut().set_max_block_size(1);
            }
            ExecutionMode::Continuous => {
                if let Some(previous) = saved.take() {
                    self.translator_mut().set_max_block_size(previous);
                }
            }
            _ => {}
        }
    }

    /// The predicate `run_once`'s parked wait blocks on: stop waiting once
    /// a pause has been requested or the condition that parked us in the
    /// first place (halted, or the translator sitting in WFI) no longer
    /// holds.
    fn should_stop_parked_wait(&self) -> bool {
        self.pause_event.is_set() || !(self.is_halted() || self.translator_ref().is_wfi())
    }

    /// Sleeps until either the nearest clock-entry deadline or any wait
    /// handle (pause event, IRQ edge, halted-finished) fires, then advances
    /// the clock by the elapsed virtual ticks — or by `nearest_limit_in` if
    /// `AdvanceImmediately` is set, skipping the wall-clock sleep entirely.
    /// Returns `Err` if the advance was cancelled mid-flight.
    fn sleep_and_advance_clock(&self) -> Result<(), ()> {
        let Some(nearest) = self.clock.nearest_limit_in() else {
            self.wake.wait_until(None, || self.should_stop_parked_wait());
            return Ok(());
        };
        let mips = self.performance_in_mips.load(Ordering::Relaxed).max(1) as f64;
        let ticks = if self.advance_immediately.load(Ordering::Relaxed) {
            nearest
        } else {
            let duration = Duration::from_secs_f64(nearest as f64 / (mips * 1_000_000.0));
            let started = Instant::now();
            self.wake.wait_until(Some(started + duration), || self.should_stop_parked_wait());
            let elapsed_ticks = (started.elapsed().as_secs_f64() * mips * 1_000_000.0) as u64;
            if elapsed_ticks == 0 {
                nearest
            } else {
                elapsed_ticks
            }
        };
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.clock.advance(ticks, false, &|| self.pause_event.is_set());
        }));
        result.map_err(|_| ())
    }

    /// The CPU thread's one function, run to completion by the thread
    /// `resume` spawns.
    fn run_once(&self) {
        if self.advance_should_be_restarted.swap(false, Ordering::SeqCst) && self.clock.has_entries() {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                self.clock.advance(0, true, &|| self.pause_event.is_set());
            }));
            if result.is_err() {
                self.advance_should_be_restarted.store(true, Ordering::SeqCst);
                return;
            }
        }

        self.handle_stepping();
        self.skip_next_stepping.store(true, Ordering::SeqCst);

        loop {
            self.adjust_block_size();

            let stepping_gated =
                self.disable_interrupts_while_stepping.load(Ordering::SeqCst) && self.execution_mode() == ExecutionMode::SingleStep;
            if !stepping_gated && !self.translator_ref().is_irq_set() {
                self.irq.repush(self.translator_mut());
            }

            if !self.is_halted() {
                self.pause_guard.enter();
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    harness_translator::with_callbacks(self, || self.translator_mut().execute())
                }));
                self.pause_guard.leave();

                match result {
                    Ok(rc) => {
                        self.skip_next_stepping.store(false, Ordering::SeqCst);
                        if rc == EXEC_BREAKPOINT {
                            let pc = self.translator_ref().get_pc() as u32;
                            self.hooks.fire(pc);
                        }
                        if self.watchpoint_resume_pending.load(Ordering::SeqCst) {
                            self.fire_halted(HaltReason::Watchpoint);
                            self.pause_event.set();
                        }
                    }
                    Err(payload) => {
                        if payload.downcast_ref::<RestartTranslationBlock>().is_some() {
                            // `restart_translation_block` already unwound the
                            // translator; the next `execute()` retranslates a
                            // single-instruction block at the current PC.
                            continue;
                        } else if payload.downcast_ref::<AdvanceCancelled>().is_some() {
                            self.advance_should_be_restarted.store(true, Ordering::SeqCst);
                            break;
                        } else {
                            std::panic::resume_unwind(payload);
                        }
                    }
                }
            }

            if self.pause_event.is_set() {
                self.wake.notify_all();
                break;
            }

            if self.is_halted() || self.translator_ref().is_wfi() {
                if self.clock.has_entries() {
                    if self.sleep_and_advance_clock().is_err() {
                        self.advance_should_be_restarted.store(true, Ordering::SeqCst);
                        break;
                    }
                } else {
                    self.wake.wait_until(None, || self.should_stop_parked_wait());
                }
            }
        }

        self.adjust_block_size();
        if self.watchpoint_resume_pending.swap(false, Ordering::SeqCst) {
            *self.mode.lock().unwrap() = ExecutionMode::SingleStep;
        }
    }

    /// Brackets one bus access from the translator with the pause guard's
    /// watchpoint-retranslation protocol; flags
    /// `watchpoint_resume_pending` once an access that *was* watchpointed
    /// returns normally (meaning the guard's restart-and-retranslate round
    /// trip already ran and this is the recovered, single-instruction
    /// pass).
    fn wrap_bus_access<R>(&self, access: AccessKind, addr: u32, f: impl FnOnce() -> R) -> R {
        self.pause_guard.initialize(access, addr, &self.bus, self.translator_ref());
        let result = f();
        self.pause_guard.dispose();
        if self.bus.is_watchpoint_at(addr, access) {
            self.watchpoint_resume_pending.store(true, Ordering::SeqCst);
        }
        result
    }
}

impl<T: Translator, B: SystemBus> TranslatorCallbacks for ExecutionLoop<T, B> {
    fn read_byte_from_bus(&self, addr: u32) -> u32 {
        self.wrap_bus_access(AccessKind::Read, addr, || self.bus.read_byte(addr) as u32)
    }

    fn read_word_from_bus(&self, addr: u32) -> u32 {
        self.wrap_bus_access(AccessKind::Read, addr, || self.bus.read_word(addr) as u32)
    }

    fn read_dword_from_bus(&self, addr: u32) -> u32 {
        self.wrap_bus_access(AccessKind::Read, addr, || self.bus.read_dword(addr))
    }

    fn write_byte_to_bus(&self, addr: u32, value: u32) {
        self.wrap_bus_access(AccessKind::Write, addr, || self.bus.write_byte(addr, value as u8));
    }

    fn write_word_to_bus(&self, addr: u32, value: u32) {
        self.wrap_bus_access(AccessKind::Write, addr, || self.bus.write_word(addr, value as u16));
    }

    fn write_dword_to_bus(&self, addr: u32, value: u32) {
        self.wrap_bus_access(AccessKind::Write, addr, || self.bus.write_dword(addr, value));
    }

    fn on_block_begin(&self, pc: u32, flags: u32) {
        self.handle_stepping();
        self.skip_next_stepping.store(false, Ordering::SeqCst);
        self.hooks.on_block_begin(pc, flags);
    }

    fn report_abort(&self, message: &str) {
        log::error!("cpu {}: guest abort reported by translator: {message}", self.slot);
        self.set_is_halted_and_notify(true);
        self.wake.notify_after(|| {
            self.pause_event.set();
        });
        self.fire_halted(HaltReason::Abort);
    }

    fn is_io_accessed(&self, addr: u32) -> bool {
        self.mem.lock().unwrap().is_accessed_via_io(addr)
    }

    fn update_instruction_counter(&self, delta: i32) {
        if delta >= 0 {
            self.executed_instructions.fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            self.executed_instructions.fetch_sub((-delta) as u64, Ordering::Relaxed);
        }
    }

    fn is_instruction_count_enabled(&self) -> bool {
        self.clock.has_entries()
    }

    fn is_block_begin_event_enabled(&self) -> bool {
        self.hooks.is_block_begin_event_enabled() || self.execution_mode() == ExecutionMode::SingleStep
    }

    fn touch_host_block(&self, offset: u32) {
        let mut mem = self.mem.lock().unwrap();
        mem.touch_host_block(offset, self.translator_mut());
    }

    fn invalidate_tb_in_other_cpus(&self, start: u32, end: u32) {
        // Broadcasting to sibling CPUs on the system bus is out of scope
        // for a single-CPU execution loop instance; a multi-CPU front end
        // would fan this out itself.
        let _ = (start, end);
    }

    fn allocate(&self, size: usize) -> usize {
        self.mem_manager.allocate(size)
    }

    fn reallocate(&self, ptr: usize, size: usize) -> usize {
        self.mem_manager.reallocate(ptr, size)
    }

    fn free(&self, ptr: usize) {
        self.mem_manager.free(ptr)
    }

    fn log_as_cpu(&self, level: i32, message: &str) {
        match level {
            0 => log::error!("cpu {}: {message}", self.slot),
            1 => log::warn!("cpu {}: {message}", self.slot),
            2 => log::info!("cpu {}: {message}", self.slot),
            _ => log::debug!("cpu {}: {message}", self.slot),
        }
    }

    fn log_disassembly(&self, pc: u32, len: u32, flags: u32) {
        if self.log_translated_blocks.load(Ordering::Relaxed) {
            log::trace!("cpu {}: translated block at {pc:#x}, {len} bytes, flags={flags:#x}", self.slot);
        }
    }

    fn get_cpu_index(&self) -> i32 {
        self.slot
    }

    fn on_translation_cache_size_change(&self, new_size: i32) {
        log::debug!("cpu {}: translator reports translation cache size change to {new_size}", self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::CpuConfig;
    use harness_translator::mock::{MockInsn, MockTranslator};
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Mutex as StdMutex;

    struct FlatBus {
        memory: StdMutex<Vec<u8>>,
        watchpoint: Option<u32>,
    }

    impl FlatBus {
        fn new(size: usize) -> Self {
            Self { memory: StdMutex::new(vec![0; size]), watchpoint: None }
        }
    }

    impl SystemBus for FlatBus {
        fn read_byte(&self, addr: u32) -> u8 {
            self.memory.lock().unwrap()[addr as usize]
        }
        fn read_word(&self, addr: u32) -> u16 {
            let mem = self.memory.lock().unwrap();
            u16::from_le_bytes([mem[addr as usize], mem[addr as usize + 1]])
        }
        fn read_dword(&self, addr: u32) -> u32 {
            let mem = self.memory.lock().unwrap();
            let a = addr as usize;
            u32::from_le_bytes([mem[a], mem[a + 1], mem[a + 2], mem[a + 3]])
        }
        fn write_byte(&self, addr: u32, value: u8) {
            self.memory.lock().unwrap()[addr as usize] = value;
        }
        fn write_word(&self, addr: u32, value: u16) {
            let mut mem = self.memory.lock().unwrap();
            mem[addr as usize..addr as usize + 2].copy_from_slice(&value.to_le_bytes());
        }
        fn write_dword(&self, addr: u32, value: u32) {
            let mut mem = self.memory.lock().unwrap();
            mem[addr as usize..addr as usize + 4].copy_from_slice(&value.to_le_bytes());
        }
        fn is_watchpoint_at(&self, addr: u32, _access: AccessKind) -> bool {
            self.watchpoint == Some(addr)
        }
    }

    fn new_loop(bus: FlatBus) -> Arc<ExecutionLoop<MockTranslator, FlatBus>> {
        let cfg = CpuConfig::default();
        let translator = MockTranslator::new(0);
        let exec = ExecutionLoop::new(translator, bus, &cfg, |line| line as i32, 4, 0);
        exec.init("test-cpu").unwrap();
        Arc::new(exec)
    }

    #[test]
    fn single_step_basic_reports_three_halted_step_events() {
        let exec = new_loop(FlatBus::new(0x100));
        exec.translator_mut().set_instruction(0, MockInsn::Nop);
        exec.translator_mut().set_instruction(4, MockInsn::Nop);
        exec.translator_mut().set_instruction(8, MockInsn::Nop);
        exec.translator_mut().set_instruction(12, MockInsn::Wfi);

        let step_events = Arc::new(StdAtomicUsize::new(0));
        let counter = step_events.clone();
        exec.on_halted(Box::new(move |args| {
            if args.reason == HaltReason::Step {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        exec.set_execution_mode(ExecutionMode::SingleStep);
        exec.resume();
        exec.step(3).unwrap();
        exec.pause();

        assert_eq!(step_events.load(Ordering::SeqCst), 3);
        assert_eq!(exec.executed_instructions(), 3);
    }

    #[test]
    fn breakpoint_hook_fires_then_can_be_removed() {
        let exec = new_loop(FlatBus::new(0x100));
        exec.translator_mut().set_instruction(0x40, MockInsn::Nop);
        exec.translator_mut().set_instruction(0x44, MockInsn::Wfi);

        let hits = Arc::new(StdAtomicUsize::new(0));
        let counter = hits.clone();
        let handle = exec.add_hook(0x40, Arc::new(move |_addr| { counter.fetch_add(1, Ordering::SeqCst); }));

        exec.resume();
        // Give the CPU thread a moment to run to WFI.
        std::thread::sleep(Duration::from_millis(50));
        exec.pause();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        exec.remove_hook(0x40, handle);
    }

    #[test]
    fn pause_resume_round_trip_leaves_instruction_count_unchanged() {
        let exec = new_loop(FlatBus::new(0x100));
        exec.translator_mut().set_instruction(0, MockInsn::Wfi);
        exec.resume();
        std::thread::sleep(Duration::from_millis(30));
        exec.pause();
        assert_eq!(exec.executed_instructions(), 0);
        assert!(exec.pause_event.is_set());
    }

    #[test]
    fn snapshot_accessors_round_trip_segments_and_latches() {
        let exec = new_loop(FlatBus::new(0x2000));
        exec.map_memory(0, 0x1000, 0x4000).unwrap();
        exec.on_gpio(0, true);

        let segments = exec.mapped_segments();
        assert_eq!(segments, vec![(0, 0x1000, 0x4000)]);
        let latches = exec.irq_latches();
        assert!(latches[0]);

        let blob = exec.export_translator_state();
        exec.import_translator_state(&blob);
        exec.restore_irq_latches(&latches);
        assert!(exec.is_set_event(0));
    }
}
