//! Clock advance on halt: with `AdvanceImmediately` set, a halted CPU
//! (parked in WFI) still drains its registered timer against virtual
//! time, without needing real wall-clock delay to elapse first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use harness_clock::ClockEntryState;
use harness_translator::mock::{MockInsn, MockTranslator};

use crate::support::{build_cpu, RamBus};

static FIRE_COUNT: AtomicU64 = AtomicU64::new(0);

fn counting_handler(state: &mut ClockEntryState) {
    let _ = state;
    FIRE_COUNT.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn a_wfi_parked_cpu_still_advances_its_registered_timer() {
    FIRE_COUNT.store(0, Ordering::SeqCst);

    let mut translator = MockTranslator::new(0);
    translator.set_instruction(0, MockInsn::Wfi);
    let cpu = build_cpu(translator, RamBus::new(0x100));
    cpu.set_advance_immediately(true);
    cpu.add_clock_entry(counting_handler, 1, 100, true);

    cpu.resume();
    std::thread::sleep(Duration::from_millis(80));
    cpu.pause();

    assert!(FIRE_COUNT.load(Ordering::SeqCst) >= 1, "the timer must fire while the CPU sits in WFI");
}

#[test]
fn the_clock_reports_no_pending_entry_until_one_is_registered() {
    let translator = MockTranslator::new(0);
    let cpu = build_cpu(translator, RamBus::new(0x100));
    assert!(cpu.clock().nearest_limit_in().is_none());
    cpu.add_clock_entry(counting_handler, 2, 50, true);
    assert_eq!(cpu.clock().nearest_limit_in(), Some(50));
}
