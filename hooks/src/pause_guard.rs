use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use harness_core::traits::{AccessKind, SystemBus, Translator};

/// Per-CPU object bracketing bus-access callbacks that implements precise
/// watchpoint pause via single-instruction retranslation.
///
/// `enter`/`leave` bracket the call into `Translator::execute`; every bus
/// access the translator performs during that window brackets itself
/// with `initialize`/`dispose`. `restart_translation_block`'s "never
/// returns normally" is modeled as a Rust panic carrying the
/// `RestartTranslationBlock` sentinel, caught with `catch_unwind` at the
/// single call site inside `harness-exec`'s loop.
pub struct PauseGuard {
    active: AtomicBool,
    guard_token: Mutex<Option<u64>>,
    block_restart_reached: AtomicBool,
    next_token: AtomicU64,
}

impl PauseGuard {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            guard_token: Mutex::new(None),
            block_restart_reached: AtomicBool::new(false),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn enter(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.active.store(false, Ordering::SeqCst);
        *self.guard_token.lock().unwrap() = None;
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Brackets one bus access. If the address is watchpointed and this
    /// is the first time the guard has seen the access, calls
    /// `Translator::restart_translation_block` — which never returns —
    /// to unwind the translator and retranslate a single-instruction
    /// block at the current PC. The second time execution reaches the
    /// same access (now inside that 1-instruction block), the latch is
    /// already set, so `initialize` clears it and lets the access proceed
    /// normally. This yields exactly one retranslation per watchpointed
    /// access.
    pub fn initialize(&self, access: AccessKind, address: u32, bus: &dyn SystemBus, translator: &dyn Translator) {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        *self.guard_token.lock().unwrap() = Some(token);

        if bus.is_watchpoint_at(address, access) {
            if !self.block_restart_reached.swap(true, Ordering::SeqCst) {
                translator.restart_translation_block();
            } else {
                self.block_restart_reached.store(false, Ordering::SeqCst);
            }
        }
    }

    pub fn dispose(&self) {
        *self.guard_token.lock().unwrap() = None;
    }

    /// Called when an external `Pause` is ordered from the CPU thread
    /// itself. Panics if the guard is active but has no live token — that
    /// combination means a bus access reached the translator through a
    /// path that bypassed `initialize`/`dispose`, which is a bug in a
    /// collaborator.
    pub fn order_pause(&self) {
        let has_token = self.guard_token.lock().unwrap().is_some();
        assert!(
            !(self.is_active() && !has_token),
            "pause ordered from the CPU thread with an active guard but no live token \
             (a bus access bypassed the pause guard)"
        );
    }
}

impl Default for PauseGuard {
    fn default() -> Self {
        Self::new()
    }
}
