//! Cancellation unwind: pausing a CPU that is mid-`advance` must not
//! leak the unwind past the execution loop, and must not drop or
//! double-count the ticks a cancelled advance was in the middle of.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use harness_clock::ClockEntryState;
use harness_translator::mock::{MockInsn, MockTranslator};

use crate::support::{build_cpu, RamBus};

static ACCUMULATED: AtomicU64 = AtomicU64::new(0);

fn accumulating_handler(state: &mut ClockEntryState) {
    let _ = state;
    ACCUMULATED.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn pausing_mid_advance_does_not_panic_the_caller_and_resume_keeps_advancing() {
    ACCUMULATED.store(0, Ordering::SeqCst);

    let mut translator = MockTranslator::new(0);
    translator.set_instruction(0, MockInsn::Wfi);
    let cpu = build_cpu(translator, RamBus::new(0x100));
    cpu.set_advance_immediately(true);
    cpu.add_clock_entry(accumulating_handler, 1, 10, true);

    // Repeatedly resume/pause in quick succession: each pause has a real
    // chance of landing while `ClockSource::advance` is mid-iteration,
    // exercising the `AdvanceCancelled` unwind-and-retry path without
    // ever panicking out to this thread.
    for _ in 0..20 {
        cpu.resume();
        std::thread::sleep(Duration::from_micros(200));
        cpu.pause();
    }

    assert!(ACCUMULATED.load(Ordering::SeqCst) > 0, "the timer must still have made progress across the cancellations");
}
