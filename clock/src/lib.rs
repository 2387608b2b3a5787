//! Clock Source: the time base driven by retired-instruction counts.

use std::sync::Mutex;

/// Mutable state of one timer, visible to its handler when it fires.
#[derive(Debug, Clone, Copy)]
pub struct ClockEntryState {
    pub value: u64,
    pub period: u64,
    pub enabled: bool,
}

/// One registered timer. "Handler identity" is the `fn` pointer's address
/// plus a caller-supplied tag, since Rust function pointers are
/// `PartialEq` but carry no meaningful ordering — identity comparison is
/// all that's actually required (entries need only be found and removed
/// by the handler that registered them, never sorted by it).
struct ClockEntry {
    handler: fn(&mut ClockEntryState),
    tag: u64,
    state: ClockEntryState,
}

/// Sentinel panic payload for `advance`'s cancellation path. Caught with
/// `std::panic::catch_unwind` at the single call site inside the
/// execution loop, exactly like `harness_core::traits::RestartTranslationBlock`.
pub struct AdvanceCancelled;

/// Ordered set of clock entries; advances virtual time driven by
/// retired-instruction counts.
///
/// Grounded on `exec/src/tb_store.rs`'s `Mutex`-guarded ordered
/// collection idiom — a `Vec` under one lock, since "ordered" here means
/// stable iteration order, not a sort key.
pub struct ClockSource {
    entries: Mutex<Vec<ClockEntry>>,
}

impl ClockSource {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    fn identity(&self, entries: &[ClockEntry], handler: fn(&mut ClockEntryState), tag: u64) -> Option<usize> {
        entries.iter().position(|e| e.handler as usize == handler as usize && e.tag == tag)
    }

    /// Add a new timer. Returns `true` if this transitioned the clock
    /// source from zero entries to non-zero — callers must invalidate the
    /// translation cache in that case, since `is_instruction_count_enabled`
    /// now returns 1 and previously translated blocks assumed it didn't.
    pub fn add(&self, handler: fn(&mut ClockEntryState), tag: u64, period: u64, enabled: bool) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let was_empty = entries.is_empty();
        entries.push(ClockEntry { handler, tag, state: ClockEntryState { value: 0, period, enabled } });
        if was_empty {
            log::debug!("clock source gained its first entry (tag={tag}, period={period})");
        }
        was_empty
    }

    pub fn remove(&self, handler: fn(&mut ClockEntryState), tag: u64) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if let Some(idx) = self.identity(&entries, handler, tag) {
            entries.remove(idx);
            if entries.is_empty() {
                log::debug!("clock source has no entries left (tag={tag})");
            }
            true
        } else {
            false
        }
    }

    pub fn get(&self, handler: fn(&mut ClockEntryState), tag: u64) -> Option<ClockEntryState> {
        let entries = self.entries.lock().unwrap();
        self.identity(&entries, handler, tag).map(|idx| entries[idx].state)
    }

    /// Visit and possibly mutate every entry's state under the internal
    /// lock.
    pub fn visit(&self, mut f: impl FnMut(&mut ClockEntryState)) {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.iter_mut() {
            f(&mut entry.state);
        }
    }

    /// Atomically mutate the entry identified by `(handler, tag)` if it
    /// exists, or insert a freshly constructed one: the visitor+factory
    /// exchange pattern used for the clock source's find-or-create calls.
    pub fn exchange(
        &self,
        handler: fn(&mut ClockEntryState),
        tag: u64,
        visit: impl FnOnce(&mut ClockEntryState),
        factory: impl FnOnce() -> ClockEntryState,
    ) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let was_empty = entries.is_empty();
        match self.identity(&entries, handler, tag) {
            Some(idx) => {
                visit(&mut entries[idx].state);
                false
            }
            None => {
                entries.push(ClockEntry { handler, tag, state: factory() });
                was_empty
            }
        }
    }

    /// Remove and return every entry (used by snapshotting to eject
    /// timers before a serialization pass, or to clear state on Reset).
    pub fn eject_all(&self) -> Vec<(fn(&mut ClockEntryState), u64, ClockEntryState)> {
        let mut entries = self.entries.lock().unwrap();
        entries.drain(..).map(|e| (e.handler, e.tag, e.state)).collect()
    }

    pub fn add_all(&self, items: Vec<(fn(&mut ClockEntryState), u64, ClockEntryState)>) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let was_empty = entries.is_empty();
        let non_empty_addition = !items.is_empty();
        for (handler, tag, state) in items {
            entries.push(ClockEntry { handler, tag, state });
        }
        was_empty && non_empty_addition
    }

    pub fn has_entries(&self) -> bool {
        !self.entries.lock().unwrap().is_empty()
    }

    pub fn current_value(&self, handler: fn(&mut ClockEntryState), tag: u64) -> Option<u64> {
        self.get(handler, tag).map(|s| s.value)
    }

    /// Smallest number of ticks until any enabled entry next fires, or
    /// `None` if there are no enabled entries.
    pub fn nearest_limit_in(&self) -> Option<u64> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .filter(|e| e.state.enabled && e.state.period > 0)
            .map(|e| e.state.period.saturating_sub(e.state.value))
            .min()
    }

    /// Advance virtual time by `ticks`, firing any entry whose period
    /// elapses. `restart` only matters to the caller (the execution loop
    /// re-enters with `restart=true` after a cancellation) — the clock
    /// source's own bookkeeping is the same either way.
    ///
    /// `should_cancel` is polled once per entry; if it reports `true`
    /// this function never returns normally — it panics with
    /// `AdvanceCancelled`, unwinding the execution loop so it can
    /// re-enter later.
    pub fn advance(&self, ticks: u64, restart: bool, should_cancel: &dyn Fn() -> bool) {
        let _ = restart;
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.iter_mut() {
            if should_cancel() {
                drop(entries);
                std::panic::panic_any(AdvanceCancelled);
            }
            if !entry.state.enabled || entry.state.period == 0 {
                continue;
            }
            entry.state.value += ticks;
            while entry.state.value >= entry.state.period {
                entry.state.value -= entry.state.period;
                (entry.handler)(&mut entry.state);
            }
        }
    }
}

impl Default for ClockSource {
    fn default() -> Self {
        Self::new()
    }
}
