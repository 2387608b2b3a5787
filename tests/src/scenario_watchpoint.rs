//! Watchpoint precise pause: a load that lands on the watched address
//! causes exactly one retranslation and halts with PC parked on the
//! instruction immediately after the watched access, having put the
//! machine into `SingleStep`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use harness_core::{ExecutionMode, HaltReason};
use harness_translator::mock::{MockInsn, MockTranslator};

use crate::support::{build_cpu, RamBus};

#[test]
fn watched_load_halts_exactly_once_past_the_access() {
    let mut translator = MockTranslator::new(0);
    translator.set_instruction(0, MockInsn::LoadDword { addr: 0x40 });
    translator.set_instruction(4, MockInsn::Wfi);
    let bus = RamBus::new(0x100);
    bus.set_watchpoint(0x40);
    let cpu = build_cpu(translator, bus);

    let halts = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&halts);
    cpu.on_halted(Box::new(move |args| recorded.lock().unwrap().push(args)));

    cpu.resume();
    std::thread::sleep(Duration::from_millis(50));
    cpu.pause();

    let recorded = halts.lock().unwrap();
    let watchpoint_halt = recorded.iter().find(|a| a.reason == HaltReason::Watchpoint);
    let halt = watchpoint_halt.expect("a watchpoint halt must have fired");
    assert_eq!(halt.pc, 4, "execution must stop on the instruction after the watched access");

    // The retranslation protocol drops the machine into SingleStep once
    // the watched access has retired.
    assert_eq!(cpu.execution_mode(), ExecutionMode::SingleStep);
}
