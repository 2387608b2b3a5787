//! Properties that must hold of the assembled `TranslationCpu` regardless
//! of which scenario produced them.

use std::time::Duration;

use harness_snapshot::SnapshotHooks;
use harness_translator::mock::{MockInsn, MockTranslator};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::support::{build_cpu, RamBus};

struct NoopHooks;
impl SnapshotHooks for NoopHooks {}

#[test]
fn pause_resume_round_trip_leaves_instruction_count_unchanged_when_parked() {
    let mut translator = MockTranslator::new(0);
    translator.set_instruction(0, MockInsn::Wfi);
    let cpu = build_cpu(translator, RamBus::new(0x100));

    cpu.resume();
    std::thread::sleep(Duration::from_millis(30));
    cpu.pause();
    assert_eq!(cpu.executed_instructions(), 0);

    cpu.resume();
    std::thread::sleep(Duration::from_millis(30));
    cpu.pause();
    assert_eq!(cpu.executed_instructions(), 0, "re-entering WFI must not retire any further instructions");
}

#[test]
fn reset_zeroes_the_instruction_counter_and_clears_halt() {
    let mut translator = MockTranslator::new(0);
    translator.set_instruction(0, MockInsn::Nop);
    translator.set_instruction(4, MockInsn::Wfi);
    let cpu = build_cpu(translator, RamBus::new(0x100));

    cpu.resume();
    std::thread::sleep(Duration::from_millis(30));
    cpu.pause();
    assert_eq!(cpu.executed_instructions(), 2);

    cpu.reset();
    assert_eq!(cpu.executed_instructions(), 0);
    assert!(!cpu.is_halted());
}

#[test]
fn snapshot_round_trip_preserves_every_configured_property() {
    let translator = MockTranslator::new(0);
    let cpu = build_cpu(translator, RamBus::new(0x100));
    cpu.set_count_threshold(777);
    cpu.set_maximum_block_size(0x100);
    cpu.set_performance_in_mips(250);
    cpu.set_log_file(Some("cpu0.log".to_string()));

    let bytes = cpu.export_snapshot(&NoopHooks).unwrap();
    cpu.set_count_threshold(1);
    cpu.set_log_file(None);
    cpu.import_snapshot(&bytes, &NoopHooks).unwrap();

    assert_eq!(cpu.count_threshold(), 777);
    assert_eq!(cpu.maximum_block_size(), 0x100);
    assert_eq!(cpu.performance_in_mips(), 250);
    assert_eq!(cpu.log_file(), Some("cpu0.log".to_string()));
}

#[test]
fn a_breakpoint_survives_a_snapshot_round_trip() {
    let mut translator = MockTranslator::new(0x1000);
    translator.set_instruction(0x1004, MockInsn::Wfi);
    let cpu = build_cpu(translator, RamBus::new(0x100));

    let hits = Arc::new(AtomicI32::new(0));
    let counter = Arc::clone(&hits);
    cpu.add_hook(0x1000, Arc::new(move |_pc| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let bytes = cpu.export_snapshot(&NoopHooks).unwrap();
    cpu.import_snapshot(&bytes, &NoopHooks).unwrap();

    cpu.resume();
    std::thread::sleep(Duration::from_millis(50));
    cpu.pause();

    assert_eq!(hits.load(Ordering::SeqCst), 1, "the rearmed breakpoint must still fire after the round trip");
}
