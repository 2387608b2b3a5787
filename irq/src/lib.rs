//! Interrupt Plane: per-line latches, edge forwarding, step gating.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use harness_core::traits::Translator;

/// Holds per-line latches; forwards edges to the translator; gates
/// delivery during stepping.
///
/// `latches` are `AtomicBool` for lock-free reads from the execution
/// loop's hot path (the per-iteration re-push check), while `on_gpio`
/// itself takes a dedicated lock so the `set_irq` call and the latch
/// update it guards stay consistent with each other — the same split used
/// elsewhere in this workspace between an `AtomicUsize` for the published
/// state and a `Mutex` for the mutation that produces it.
pub struct InterruptPlane {
    latches: Vec<AtomicBool>,
    decode_interrupt: fn(u32) -> i32,
    gpio_lock: Mutex<()>,
}

impl InterruptPlane {
    /// `num_lines` must be at least 2: a fixed count declared by the
    /// architecture.
    pub fn new(num_lines: usize, decode_interrupt: fn(u32) -> i32) -> Self {
        assert!(num_lines >= 2, "architecture must declare at least 2 IRQ lines");
        Self {
            latches: (0..num_lines).map(|_| AtomicBool::new(false)).collect(),
            decode_interrupt,
            gpio_lock: Mutex::new(()),
        }
    }

    pub fn line_count(&self) -> usize {
        self.latches.len()
    }

    pub fn is_set(&self, line: u32) -> bool {
        self.latches[line as usize].load(Ordering::Acquire)
    }

    pub fn any_set(&self) -> bool {
        self.latches.iter().any(|l| l.load(Ordering::Acquire))
    }

    /// Samples every latch to a plain bool array — the IRQ-latch half of a
    /// pre-serialization snapshot.
    pub fn latches_snapshot(&self) -> Vec<bool> {
        self.latches.iter().map(|l| l.load(Ordering::Acquire)).collect()
    }

    /// Rebuilds the latches from a previously sampled array. Used by
    /// late-post-deserialization; does not forward anything to the
    /// translator, since the re-push that re-arms missed edges happens on
    /// the execution loop's own next iteration.
    pub fn restore_latches(&self, saved: &[bool]) {
        for (latch, &value) in self.latches.iter().zip(saved) {
            latch.store(value, Ordering::Release);
        }
    }

    /// `started` and `stepping_gated` correspond to "the CPU has started"
    /// and "is currently single-stepping with interrupts-disabled-while-
    /// stepping"; `on_possessed_thread` drives the unsynchronized-caller
    /// warning.
    pub fn on_gpio(
        &self,
        line: u32,
        level: bool,
        started: bool,
        stepping_gated: bool,
        on_possessed_thread: bool,
        translator: &mut dyn Translator,
    ) {
        let _guard = self.gpio_lock.lock().unwrap();
        let decoded = (self.decode_interrupt)(line);
        if !on_possessed_thread {
            log::warn!("OnGPIO(line={line}) called from a non-CPU thread without external synchronization");
        }
        if started && !stepping_gated {
            translator.set_irq(decoded, level as i32);
        }
        self.latches[line as usize].store(level, Ordering::Release);
    }

    /// Re-push every set latch's current level to the translator. Called
    /// once per loop iteration, required to re-arm edges missed while
    /// paused.
    ///
    /// Callers gate this on `!suppressed_by_stepping && !translator.is_irq_set()`
    /// before invoking it: only run the re-push when delivery isn't
    /// suppressed by stepping and no line is already latched in the
    /// translator.
    pub fn repush(&self, translator: &mut dyn Translator) {
        for (line, latch) in self.latches.iter().enumerate() {
            if latch.load(Ordering::Acquire) {
                let decoded = (self.decode_interrupt)(line as u32);
                translator.set_irq(decoded, 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingTranslator {
        set_irq_calls: Vec<(i32, i32)>,
    }

    impl CountingTranslator {
        fn new() -> Self {
            Self { set_irq_calls: Vec::new() }
        }
    }

    impl Translator for CountingTranslator {
        fn init(&mut self, _cpu_type: &str) -> Result<(), harness_core::CpuError> { Ok(()) }
        fn dispose(&mut self) {}
        fn reset(&mut self) {}
        fn execute(&mut self) -> i32 { 0 }
        fn set_paused(&mut self) {}
        fn clear_paused(&mut self) {}
        fn is_wfi(&self) -> bool { false }
        fn get_pc(&self) -> u64 { 0 }
        fn set_pc(&mut self, _pc: u64) {}
        fn get_page_size(&self) -> u32 { 0x1000 }
        fn map_range(&mut self, _start: u32, _size: u32) {}
        fn unmap_range(&mut self, _start: u32, _end: u32) {}
        fn is_range_mapped(&self, _start: u32, _end: u32) -> bool { false }
        fn invalidate_translation_blocks(&mut self, _start: u32, _end: u32) {}
        fn translate_to_physical(&self, addr: u32) -> u32 { addr }
        fn set_host_blocks(&mut self, _blocks: &[harness_core::HostMemoryBlock]) {}
        fn free_host_blocks(&mut self) {}
        fn set_count_threshold(&mut self, _threshold: i32) {}
        fn set_irq(&mut self, line: i32, level: i32) { self.set_irq_calls.push((line, level)); }
        fn is_irq_set(&self) -> bool { self.set_irq_calls.last().map(|&(_, l)| l != 0).unwrap_or(false) }
        fn add_breakpoint(&mut self, _addr: u32) {}
        fn remove_breakpoint(&mut self, _addr: u32) {}
        fn attach_log_block_fetch(&mut self, _enabled: bool) {}
        fn set_on_block_translation_enabled(&mut self, _enabled: bool) {}
        fn set_translation_cache_size(&mut self, _size: usize) {}
        fn invalidate_translation_cache(&mut self) {}
        fn set_max_block_size(&mut self, size: u32) -> u32 { size }
        fn get_max_block_size(&self) -> u32 { 0x7FF }
        fn restore_context(&mut self) {}
        fn export_state(&self) -> Vec<u8> { Vec::new() }
        fn import_state(&mut self, _blob: &[u8]) {}
    }

    fn identity_decode(line: u32) -> i32 {
        line as i32
    }

    #[test]
    fn on_gpio_sets_latch_and_forwards_when_started() {
        let plane = InterruptPlane::new(4, identity_decode);
        let mut t = CountingTranslator::new();
        plane.on_gpio(0, true, true, false, true, &mut t);
        assert!(plane.is_set(0));
        assert_eq!(t.set_irq_calls, vec![(0, 1)]);
    }

    #[test]
    fn on_gpio_does_not_forward_when_stepping_gated() {
        let plane = InterruptPlane::new(4, identity_decode);
        let mut t = CountingTranslator::new();
        plane.on_gpio(1, true, true, true, true, &mut t);
        assert!(plane.is_set(1));
        assert!(t.set_irq_calls.is_empty());
    }

    #[test]
    fn repush_forwards_every_set_line() {
        let plane = InterruptPlane::new(3, identity_decode);
        let mut t = CountingTranslator::new();
        plane.on_gpio(0, true, false, false, true, &mut t);
        plane.on_gpio(2, true, false, false, true, &mut t);
        t.set_irq_calls.clear();
        plane.repush(&mut t);
        assert_eq!(t.set_irq_calls, vec![(0, 1), (2, 1)]);
    }

    #[test]
    fn snapshot_and_restore_round_trips_latches() {
        let plane = InterruptPlane::new(3, identity_decode);
        let mut t = CountingTranslator::new();
        plane.on_gpio(0, true, false, false, true, &mut t);
        plane.on_gpio(2, true, false, false, true, &mut t);
        let saved = plane.latches_snapshot();
        assert_eq!(saved, vec![true, false, true]);

        let restored = InterruptPlane::new(3, identity_decode);
        restored.restore_latches(&saved);
        assert!(restored.is_set(0));
        assert!(!restored.is_set(1));
        assert!(restored.is_set(2));
    }

    #[test]
    fn lowering_before_repush_delivers_nothing() {
        let plane = InterruptPlane::new(2, identity_decode);
        let mut t = CountingTranslator::new();
        plane.on_gpio(0, true, false, false, true, &mut t);
        plane.on_gpio(0, false, false, false, true, &mut t);
        t.set_irq_calls.clear();
        plane.repush(&mut t);
        assert!(t.set_irq_calls.is_empty());
    }
}
