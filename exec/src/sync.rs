//! Waitable-event primitives used by the execution loop.
//!
//! Plain `Mutex`/`Condvar` rather than a crate like `parking_lot`, matching
//! `exec/src/tb_store.rs`'s `Mutex<Vec<Option<usize>>>` idiom;
//! `ManualResetEvent` and `StepGate` follow the same standard-library-only
//! approach.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A manual-reset event: `set` latches until `reset` clears it. Waiters
/// block on `wait`/`wait_timeout` until the flag is set, same as the CLR's
/// `ManualResetEvent` this models.
pub struct ManualResetEvent {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl ManualResetEvent {
    pub fn new(initial: bool) -> Self {
        Self { state: Mutex::new(initial), condvar: Condvar::new() }
    }

    pub fn set(&self) {
        *self.state.lock().unwrap() = true;
        self.condvar.notify_all();
    }

    pub fn reset(&self) {
        *self.state.lock().unwrap() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.state.lock().unwrap()
    }

    pub fn wait(&self) {
        let guard = self.state.lock().unwrap();
        let _guard = self.condvar.wait_while(guard, |set| !*set).unwrap();
    }

    /// Waits until set or `timeout` elapses. Returns whether the event was
    /// observed set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.state.lock().unwrap();
        let (guard, _) = self.condvar.wait_timeout_while(guard, timeout, |set| !*set).unwrap();
        *guard
    }
}

impl Default for ManualResetEvent {
    fn default() -> Self {
        Self::new(false)
    }
}

/// The step semaphore plus the step-done countdown used by `Step`/
/// `HandleStepping`.
///
/// `Step(count)` resets `done_remaining` to `count`, releases `tokens` by
/// `count`, then waits for `done_remaining` to reach zero.
/// `HandleStepping` (running on the CPU thread) waits for one token, then
/// decrements `done_remaining` and wakes any `Step` caller blocked on it.
#[derive(Default)]
struct StepState {
    tokens: u64,
    done_remaining: u64,
}

pub struct StepGate {
    state: Mutex<StepState>,
    condvar: Condvar,
}

impl StepGate {
    pub fn new() -> Self {
        Self { state: Mutex::new(StepState::default()), condvar: Condvar::new() }
    }

    /// `Step`'s half of the protocol: reset the countdown to `count`,
    /// release `count` step tokens, then block until every one of them has
    /// been consumed and accounted for.
    pub fn release_and_wait(&self, count: u64) {
        {
            let mut state = self.state.lock().unwrap();
            state.done_remaining = count;
            state.tokens += count;
        }
        self.condvar.notify_all();

        let guard = self.state.lock().unwrap();
        let _guard = self.condvar.wait_while(guard, |s| s.done_remaining > 0).unwrap();
    }

    /// `HandleStepping`'s half: block until a token is available, consume
    /// it, then signal one step done.
    pub fn wait_for_token_and_signal_done(&self) {
        {
            let guard = self.state.lock().unwrap();
            let mut guard = self.condvar.wait_while(guard, |s| s.tokens == 0).unwrap();
            guard.tokens -= 1;
        }
        {
            let mut state = self.state.lock().unwrap();
            state.done_remaining = state.done_remaining.saturating_sub(1);
        }
        self.condvar.notify_all();
    }

    /// Used by `Pause` when called from a non-CPU thread: unblocks a
    /// possibly-sleeping `HandleStepping` without requiring a matching
    /// `Step` call, then drains the one token it handed out so it isn't
    /// mistaken for a still-pending step later.
    pub fn release_one_and_drain(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.done_remaining = 1;
            state.tokens += 1;
        }
        self.condvar.notify_all();
        let mut state = self.state.lock().unwrap();
        if state.tokens > 0 {
            state.tokens -= 1;
        }
    }
}

impl Default for StepGate {
    fn default() -> Self {
        Self::new()
    }
}

/// One condvar shared by every event source the execution loop's halted/WFI
/// wait needs to react to (pause event, IRQ latch edges, halted-finished).
/// Rust has no direct `WaitForMultipleObjects` analog; the loop's actual
/// requirement is "wake when any relevant state changes".
///
/// `gate` guards nothing on its own — the state a waiter cares about
/// (`pause_event`, `is_halted`, the IRQ latches) lives in its own
/// container. What `gate` buys is atomicity between a setter and a
/// waiter: every setter that can make a waiter's predicate true must
/// mutate that state through `notify_after`, which holds `gate` across
/// both the mutation and the `notify_all`. `wait_until` takes the
/// waiter's own predicate and rechecks it under the same `gate` lock,
/// immediately before sleeping and after every wake, via `wait_while`.
/// That closes the gap a plain "check predicate, then call wait" would
/// otherwise have: a `notify_after` landing between the waiter's
/// predicate check and the moment it actually blocks can no longer be
/// dropped, because the waiter never releases `gate` between those two
/// steps, and the setter can't complete its own mutation-plus-notify
/// without first acquiring `gate` itself.
#[derive(Default)]
pub struct WakeSet {
    gate: Mutex<()>,
    condvar: Condvar,
}

impl WakeSet {
    pub fn new() -> Self {
        Self { gate: Mutex::new(()), condvar: Condvar::new() }
    }

    /// Runs `mutate` while holding `gate`, then notifies every waiter
    /// before releasing it. Any setter that changes state a `wait_until`
    /// predicate reads must go through this rather than calling
    /// `notify_all` on its own, or the atomicity `wait_until` relies on
    /// doesn't hold.
    pub fn notify_after(&self, mutate: impl FnOnce()) {
        let _guard = self.gate.lock().unwrap();
        mutate();
        self.condvar.notify_all();
    }

    pub fn notify_all(&self) {
        let _guard = self.gate.lock().unwrap();
        self.condvar.notify_all();
    }

    /// Blocks until `should_stop_waiting` reports `true` or `deadline`
    /// passes, whichever comes first. A `None` deadline waits
    /// indefinitely. The predicate is evaluated under `gate` before the
    /// first sleep and after every wake, so a condition that already
    /// holds by the time this is called never blocks at all.
    pub fn wait_until(&self, deadline: Option<Instant>, should_stop_waiting: impl Fn() -> bool) {
        let guard = self.gate.lock().unwrap();
        match deadline {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                let _ = self.condvar.wait_timeout_while(guard, timeout, |_| !should_stop_waiting());
            }
            None => {
                let _ = self.condvar.wait_while(guard, |_| !should_stop_waiting());
            }
        }
    }
}
