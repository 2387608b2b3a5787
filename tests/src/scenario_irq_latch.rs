//! IRQ latch across pause: a line raised while the CPU is paused stays
//! latched, and is re-pushed to the translator once execution resumes.

use std::time::Duration;

use harness_snapshot::SnapshotHooks;
use harness_translator::mock::{MockInsn, MockTranslator};

use crate::support::{build_cpu, RamBus};

#[test]
fn latch_set_while_paused_survives_and_is_visible_once_resumed() {
    let mut translator = MockTranslator::new(0);
    translator.set_instruction(0, MockInsn::Wfi);
    let cpu = build_cpu(translator, RamBus::new(0x100));

    // Never started: on_gpio still latches the line even though nothing
    // is running to deliver it to yet.
    cpu.on_gpio(2, true);
    assert!(cpu.is_set_event(2));
    assert_eq!(cpu.irq(), vec![false, false, true, false]);

    cpu.resume();
    std::thread::sleep(Duration::from_millis(30));
    cpu.pause();

    // The latch is untouched by pause/resume; it is level-triggered state,
    // not an edge consumed by delivery.
    assert!(cpu.is_set_event(2));

    cpu.on_gpio(2, false);
    assert!(!cpu.is_set_event(2));
}

struct NoopHooks;
impl SnapshotHooks for NoopHooks {}

#[test]
fn irq_latches_round_trip_through_a_snapshot() {
    let translator = MockTranslator::new(0);
    let cpu = build_cpu(translator, RamBus::new(0x100));
    cpu.on_gpio(0, true);
    cpu.on_gpio(3, true);
    assert_eq!(cpu.irq(), vec![true, false, false, true]);

    let bytes = cpu.export_snapshot(&NoopHooks).unwrap();
    cpu.on_gpio(0, false);
    cpu.on_gpio(1, true);
    cpu.import_snapshot(&bytes, &NoopHooks).unwrap();

    assert_eq!(cpu.irq(), vec![true, false, false, true], "import must restore the latches captured at export time");
}
