//! Properties of the lower-level loop that a front end built on
//! `TranslationCpu` never needs directly but that its wrappers must
//! still uphold: mapping/unmapping segment bookkeeping, the translation
//! cache sizing rule, and the memory manager's leak check at dispose.

use std::sync::Arc;

use harness_clock::ClockEntryState;
use harness_core::CpuConfig;
use harness_exec::ExecutionLoop;
use harness_translator::mock::MockTranslator;

use crate::support::RamBus;

fn new_loop() -> Arc<ExecutionLoop<MockTranslator, RamBus>> {
    let cfg = CpuConfig::default();
    let translator = MockTranslator::new(0);
    let exec = ExecutionLoop::new(translator, RamBus::new(0x100), &cfg, |line| line as i32, 4, 0);
    exec.init("test-cpu").unwrap();
    Arc::new(exec)
}

#[test]
fn mapping_two_segments_sets_the_cache_size_to_their_total_over_four() {
    let exec = new_loop();
    exec.map_memory(0x0000, 0x1000, 0x1000).unwrap();
    exec.map_memory(0x1000, 0x1000, 0x2000).unwrap();
    assert_eq!(exec.translation_cache_size(), 0x2000 / 4);
}

#[test]
fn map_rejects_a_region_that_is_not_page_aligned() {
    let exec = new_loop();
    assert!(exec.map_memory(0x100, 0x1000, 0x1000).is_err());
}

#[test]
fn map_rejects_overlapping_regions() {
    let exec = new_loop();
    exec.map_memory(0, 0x2000, 0x1000).unwrap();
    assert!(exec.map_memory(0x1000, 0x1000, 0x2000).is_err());
}

#[test]
fn unmap_removes_the_segment_from_the_reported_list() {
    let exec = new_loop();
    exec.map_memory(0, 0x1000, 0x1000).unwrap();
    assert_eq!(exec.mapped_segments(), vec![(0, 0x1000, 0x1000)]);
    exec.unmap_memory(0, 0x1000).unwrap();
    assert!(exec.mapped_segments().is_empty());
}

#[test]
fn a_hook_registers_exactly_one_breakpoint_address_no_matter_how_many_callbacks_share_it() {
    let exec = new_loop();
    let a = exec.add_hook(0x40, Arc::new(|_| {}));
    let b = exec.add_hook(0x40, Arc::new(|_| {}));
    assert_eq!(exec.breakpoint_addresses(), vec![0x40]);

    exec.remove_hook(0x40, a);
    assert_eq!(exec.breakpoint_addresses(), vec![0x40], "one callback remains, the breakpoint stays armed");

    exec.remove_hook(0x40, b);
    assert!(exec.breakpoint_addresses().is_empty(), "last callback gone, the breakpoint is disarmed");
}

fn noop_clock_handler(_state: &mut ClockEntryState) {}

#[test]
fn the_first_clock_entry_is_the_zero_to_nonzero_transition() {
    let exec = new_loop();
    assert!(exec.clock().nearest_limit_in().is_none());
    exec.add_clock_entry(noop_clock_handler, 1, 1000, true);
    assert!(exec.clock().nearest_limit_in().is_some());
}

#[test]
fn host_memory_freed_before_dispose_leaves_no_outstanding_allocation() {
    let exec = new_loop();
    let ptr = exec.allocate_host_memory(64);
    assert_ne!(ptr, 0);
    exec.free_host_memory(ptr);
    exec.dispose();
}

#[test]
#[should_panic(expected = "outstanding")]
fn dispose_panics_on_a_leaked_host_allocation() {
    let exec = new_loop();
    let _leak = exec.allocate_host_memory(64);
    exec.dispose();
}
