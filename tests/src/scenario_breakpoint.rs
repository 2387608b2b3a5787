//! Breakpoint hit: a hook fires exactly once at the breakpointed address,
//! then stops firing once removed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use harness_translator::mock::{MockInsn, MockTranslator};

use crate::support::{build_cpu, RamBus};

#[test]
fn breakpoint_hook_fires_once_then_removal_silences_it() {
    let mut translator = MockTranslator::new(0x40);
    translator.set_instruction(0x40, MockInsn::Nop);
    translator.set_instruction(0x44, MockInsn::Wfi);
    let cpu = build_cpu(translator, RamBus::new(0x100));

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let handle = cpu.add_hook(0x40, Arc::new(move |_addr| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    cpu.resume();
    std::thread::sleep(Duration::from_millis(50));
    cpu.pause();

    assert_eq!(hits.load(Ordering::SeqCst), 1);

    cpu.remove_hook(0x40, handle);
    cpu.reset();
    cpu.resume();
    std::thread::sleep(Duration::from_millis(50));
    cpu.pause();

    assert_eq!(hits.load(Ordering::SeqCst), 1, "hook must not fire again once removed");
}
