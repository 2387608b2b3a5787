//! Single-step basic: three `Step` instructions retired one at a time,
//! with `ExecutedInstructions` tracking them exactly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use harness_core::{ExecutionMode, HaltReason};
use harness_translator::mock::{MockInsn, MockTranslator};

use crate::support::{build_cpu, RamBus};

#[test]
fn three_steps_report_three_step_halts_and_advance_the_counter() {
    let mut translator = MockTranslator::new(0);
    translator.set_instruction(0, MockInsn::Nop);
    translator.set_instruction(4, MockInsn::Nop);
    translator.set_instruction(8, MockInsn::Nop);
    translator.set_instruction(12, MockInsn::Wfi);
    let cpu = build_cpu(translator, RamBus::new(0x100));

    let step_events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&step_events);
    cpu.on_halted(Box::new(move |args| {
        if args.reason == HaltReason::Step {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }));

    cpu.set_execution_mode(ExecutionMode::SingleStep);
    cpu.resume();
    cpu.step(3).unwrap();
    cpu.pause();

    assert_eq!(step_events.load(Ordering::SeqCst), 3);
    assert_eq!(cpu.executed_instructions(), 3);
}

#[test]
fn stepping_outside_single_step_mode_is_rejected() {
    let translator = MockTranslator::new(0);
    let cpu = build_cpu(translator, RamBus::new(0x100));
    assert_eq!(cpu.execution_mode(), ExecutionMode::Continuous);
    assert!(cpu.step(1).is_err());
}
