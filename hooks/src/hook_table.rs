use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use harness_core::traits::Translator;

/// Opaque handle returned by `add_hook`, used to remove exactly the
/// callback that was registered — add-returns-a-handle rather than
/// comparing closures for identity, since Rust closures have no
/// meaningful equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(u64);

type Callback = Arc<dyn Fn(u32) + Send + Sync>;
type BlockBeginCallback = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Address-keyed sets of breakpoint callbacks; block-begin hook.
///
/// A breakpoint exists in the translator iff the callback set at that
/// address is non-empty — `add_hook`/`remove_hook`/`remove_all_at` keep
/// that invariant by calling `add_breakpoint`/`remove_breakpoint` exactly
/// at the 0-to-1 and 1-to-0 transitions. Grounded on
/// `exec/src/tb_store.rs`'s per-entry locking discipline.
pub struct HookTable {
    entries: Mutex<HashMap<u32, Vec<(HookHandle, Callback)>>>,
    block_begin: Mutex<Option<BlockBeginCallback>>,
    next_id: AtomicU64,
}

impl HookTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            block_begin: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add_hook(&self, addr: u32, cb: Callback, translator: &mut dyn Translator) -> HookHandle {
        let handle = HookHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.lock().unwrap();
        let set = entries.entry(addr).or_insert_with(Vec::new);
        if set.is_empty() {
            log::trace!("installing breakpoint at {addr:#x}");
            translator.add_breakpoint(addr);
        }
        set.push((handle, cb));
        handle
    }

    pub fn remove_hook(&self, addr: u32, handle: HookHandle, translator: &mut dyn Translator) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(set) = entries.get_mut(&addr) {
            set.retain(|(h, _)| *h != handle);
            if set.is_empty() {
                entries.remove(&addr);
                log::trace!("removing breakpoint at {addr:#x}, last callback dropped");
                translator.remove_breakpoint(addr);
            }
        }
    }

    pub fn remove_all_at(&self, addr: u32, translator: &mut dyn Translator) {
        let mut entries = self.entries.lock().unwrap();
        if entries.remove(&addr).is_some() {
            log::trace!("removing all callbacks and breakpoint at {addr:#x}");
            translator.remove_breakpoint(addr);
        }
    }

    pub fn has_breakpoint_at(&self, addr: u32) -> bool {
        self.entries.lock().unwrap().get(&addr).is_some_and(|s| !s.is_empty())
    }

    /// Every address currently holding at least one hook callback. Used by
    /// late-post-deserialization to re-push `add_breakpoint` for each one
    /// after the translator is reloaded from a snapshot — the Rust-side
    /// callbacks survive the round trip untouched, but the fresh translator
    /// instance has no breakpoints set until told.
    pub fn breakpoint_addresses(&self) -> Vec<u32> {
        self.entries.lock().unwrap().keys().copied().collect()
    }

    /// Run every callback registered at `addr` — the translator-visible
    /// effect of a breakpoint trap firing at the current PC.
    pub fn fire(&self, addr: u32) {
        let callbacks: Vec<Callback> = {
            let entries = self.entries.lock().unwrap();
            entries.get(&addr).map(|s| s.iter().map(|(_, cb)| cb.clone()).collect()).unwrap_or_default()
        };
        for cb in callbacks {
            cb(addr);
        }
    }

    /// Install or clear the per-CPU block-begin callback. Returns `true`
    /// if this call transitioned between `None` and `Some` — the
    /// translator's `is_block_begin_event_enabled` export changes value
    /// on that transition, which forces a translation-cache invalidation.
    pub fn set_hook_at_block_begin(&self, cb: Option<BlockBeginCallback>) -> bool {
        let mut slot = self.block_begin.lock().unwrap();
        let was_some = slot.is_some();
        let becomes_some = cb.is_some();
        *slot = cb;
        was_some != becomes_some
    }

    pub fn is_block_begin_event_enabled(&self) -> bool {
        self.block_begin.lock().unwrap().is_some()
    }

    pub fn on_block_begin(&self, pc: u32, flags: u32) {
        let cb = self.block_begin.lock().unwrap().clone();
        if let Some(cb) = cb {
            cb(pc, flags);
        }
    }
}

impl Default for HookTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct NullTranslator {
        breakpoints: Vec<u32>,
    }

    impl NullTranslator {
        fn new() -> Self {
            Self { breakpoints: Vec::new() }
        }
    }

    impl Translator for NullTranslator {
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
        fn set_irq(&mut self, _line: i32, _level: i32) {}
        fn is_irq_set(&self) -> bool { false }
        fn add_breakpoint(&mut self, addr: u32) { self.breakpoints.push(addr); }
        fn remove_breakpoint(&mut self, addr: u32) { self.breakpoints.retain(|&a| a != addr); }
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

    #[test]
    fn add_hook_installs_breakpoint_once() {
        let table = HookTable::new();
        let mut t = NullTranslator::new();
        let fired = Arc::new(AtomicBool::new(false));
        let f1 = fired.clone();
        table.add_hook(0x40, Arc::new(move |_| f1.store(true, Ordering::SeqCst)), &mut t);
        table.add_hook(0x40, Arc::new(|_| {}), &mut t);
        assert_eq!(t.breakpoints, vec![0x40]);
        table.fire(0x40);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn remove_hook_clears_breakpoint_when_set_empties() {
        let table = HookTable::new();
        let mut t = NullTranslator::new();
        let h = table.add_hook(0x40, Arc::new(|_| {}), &mut t);
        assert!(table.has_breakpoint_at(0x40));
        table.remove_hook(0x40, h, &mut t);
        assert!(!table.has_breakpoint_at(0x40));
        assert!(t.breakpoints.is_empty());
    }

    #[test]
    fn remove_hook_leaves_breakpoint_if_other_callbacks_remain() {
        let table = HookTable::new();
        let mut t = NullTranslator::new();
        let h1 = table.add_hook(0x40, Arc::new(|_| {}), &mut t);
        let _h2 = table.add_hook(0x40, Arc::new(|_| {}), &mut t);
        table.remove_hook(0x40, h1, &mut t);
        assert!(table.has_breakpoint_at(0x40));
    }

    #[test]
    fn breakpoint_addresses_lists_every_non_empty_set() {
        let table = HookTable::new();
        let mut t = NullTranslator::new();
        table.add_hook(0x40, Arc::new(|_| {}), &mut t);
        table.add_hook(0x80, Arc::new(|_| {}), &mut t);
        let mut addrs = table.breakpoint_addresses();
        addrs.sort();
        assert_eq!(addrs, vec![0x40, 0x80]);
    }

    #[test]
    fn block_begin_toggle_reports_transition() {
        let table = HookTable::new();
        assert!(table.set_hook_at_block_begin(Some(Arc::new(|_, _| {}))));
        assert!(!table.set_hook_at_block_begin(Some(Arc::new(|_, _| {}))));
        assert!(table.set_hook_at_block_begin(None));
    }
}
