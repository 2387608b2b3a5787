//! A pure-Rust fake translator used by every test in this workspace that
//! needs a `Translator` without a real per-architecture shared object.
//!
//! `MockTranslator` runs entirely in-process, but it reaches its
//! `TranslatorCallbacks` the same way `NativeTranslator` does: through the
//! thread-local slot `crate::exports::with_callbacks` installs for the
//! duration of one `execute()` call. This keeps the mock honest about
//! which callback implementation actually receives its calls — whatever
//! `execute()` is invoked under (an `ExecutionLoop`, in every real use) —
//! rather than one fixed at construction time, which a real `.so` has no
//! way to do either. `on_block_begin` is a plain virtual call that can
//! itself block (e.g. on a step semaphore), exactly as a blocking
//! callback from a real `.so` would.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};

use harness_core::error::CpuError;
use harness_core::mem_block::HostMemoryBlock;
use harness_core::traits::{RestartTranslationBlock, Translator, TranslatorCallbacks};
use harness_core::{EXEC_BREAKPOINT, EXEC_YIELD};

use crate::exports::with_current;

/// One instruction in a `MockTranslator`'s guest program, addressed by PC.
/// Instructions not present in the program default to `Nop`.
#[derive(Debug, Clone, Copy)]
pub enum MockInsn {
    Nop,
    LoadDword { addr: u32 },
    StoreDword { addr: u32, value: u32 },
    Wfi,
}

/// A safety valve against a cyclic program with no breakpoint or `Wfi` to
/// stop on, so a buggy test hangs instead of looping forever.
const MAX_INSNS_PER_EXECUTE: u32 = 1_000_000;

pub struct MockTranslator {
    program: HashMap<u32, MockInsn>,
    insn_width: u32,
    pc: u32,
    page_size: u32,
    paused: bool,
    wfi: bool,
    breakpoints: HashSet<u32>,
    last_breakpoint_pc: Option<u32>,
    max_block_size: u32,
    translation_cache_size: usize,
    count_threshold: i32,
    irq_levels: HashMap<i32, i32>,
    mapped_ranges: Vec<(u32, u32)>,
    host_blocks: Vec<HostMemoryBlock>,
    block_begin_event_enabled: bool,
    log_block_fetch_enabled: bool,
    /// Set by `restart_translation_block` and consumed by the next
    /// `execute()`, which then yields after exactly one instruction —
    /// standing in for a real translator retranslating a single-instruction
    /// block at the current PC.
    one_shot_after_restart: Cell<bool>,
}

impl MockTranslator {
    pub fn new(entry_pc: u32) -> Self {
        Self {
            program: HashMap::new(),
            insn_width: 4,
            pc: entry_pc,
            page_size: 0x1000,
            paused: false,
            wfi: false,
            breakpoints: HashSet::new(),
            last_breakpoint_pc: None,
            max_block_size: 0x7FF,
            translation_cache_size: 32 * 1024 * 1024,
            count_threshold: 5000,
            irq_levels: HashMap::new(),
            mapped_ranges: Vec::new(),
            host_blocks: Vec::new(),
            block_begin_event_enabled: false,
            log_block_fetch_enabled: false,
            one_shot_after_restart: Cell::new(false),
        }
    }

    /// Installs one instruction at `pc`. Test setup helper; has no
    /// counterpart in a real translator, which translates guest code
    /// rather than having it handed to it pre-decoded.
    pub fn set_instruction(&mut self, pc: u32, insn: MockInsn) {
        self.program.insert(pc, insn);
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }
}

impl Translator for MockTranslator {
    fn init(&mut self, cpu_type: &str) -> Result<(), CpuError> {
        if cpu_type.is_empty() {
            return Err(CpuError::UnknownCpuType(cpu_type.to_string()));
        }
        Ok(())
    }

    fn dispose(&mut self) {
        self.program.clear();
        self.host_blocks.clear();
    }

    fn reset(&mut self) {
        self.pc = 0;
        self.wfi = false;
        self.last_breakpoint_pc = None;
    }

    fn execute(&mut self) -> i32 {
        let one_shot = self.one_shot_after_restart.take();
        let mut insns_in_block = 0u32;
        let mut total_insns = 0u32;
        with_current(|cb| cb.on_block_begin(self.pc, 0));

        loop {
            if self.wfi {
                return EXEC_YIELD;
            }

            if self.breakpoints.contains(&self.pc) {
                if self.last_breakpoint_pc != Some(self.pc) {
                    self.last_breakpoint_pc = Some(self.pc);
                    return EXEC_BREAKPOINT;
                }
                self.last_breakpoint_pc = None;
            }

            match self.program.get(&self.pc).copied().unwrap_or(MockInsn::Nop) {
                MockInsn::Nop => {}
                MockInsn::LoadDword { addr } => {
                    with_current(|cb| cb.read_dword_from_bus(addr));
                }
                MockInsn::StoreDword { addr, value } => {
                    with_current(|cb| cb.write_dword_to_bus(addr, value));
                }
                MockInsn::Wfi => {
                    self.wfi = true;
                }
            }
            with_current(|cb| cb.update_instruction_counter(1));
            self.pc = self.pc.wrapping_add(self.insn_width);
            insns_in_block += 1;
            total_insns += 1;

            if one_shot {
                return EXEC_YIELD;
            }
            if self.wfi {
                return EXEC_YIELD;
            }
            if total_insns >= MAX_INSNS_PER_EXECUTE {
                return EXEC_YIELD;
            }
            if insns_in_block >= self.max_block_size {
                insns_in_block = 0;
                with_current(|cb| cb.on_block_begin(self.pc, 0));
                continue;
            }
            if self.breakpoints.contains(&self.pc) {
                // A new block starts wherever a breakpoint sits, matching a
                // real translator's block boundaries at breakpoint PCs.
                insns_in_block = 0;
                with_current(|cb| cb.on_block_begin(self.pc, 0));
            }
        }
    }

    fn restart_translation_block(&self) -> ! {
        self.one_shot_after_restart.set(true);
        std::panic::panic_any(RestartTranslationBlock)
    }

    fn set_paused(&mut self) {
        self.paused = true;
    }

    fn clear_paused(&mut self) {
        self.paused = false;
    }

    fn is_wfi(&self) -> bool {
        self.wfi
    }

    fn get_pc(&self) -> u64 {
        self.pc as u64
    }

    fn set_pc(&mut self, pc: u64) {
        self.pc = pc as u32;
    }

    fn get_page_size(&self) -> u32 {
        self.page_size
    }

    fn map_range(&mut self, start: u32, size: u32) {
        self.mapped_ranges.push((start, start.wrapping_add(size)));
    }

    fn unmap_range(&mut self, start: u32, end: u32) {
        self.mapped_ranges.retain(|&(s, e)| !(s == start && e == end));
    }

    fn is_range_mapped(&self, start: u32, end: u32) -> bool {
        self.mapped_ranges.iter().any(|&(s, e)| s <= start && end <= e)
    }

    fn invalidate_translation_blocks(&mut self, _start: u32, _end: u32) {}

    fn translate_to_physical(&self, addr: u32) -> u32 {
        addr
    }

    fn set_host_blocks(&mut self, blocks: &[HostMemoryBlock]) {
        self.host_blocks = blocks.to_vec();
    }

    fn free_host_blocks(&mut self) {
        self.host_blocks.clear();
    }

    fn set_count_threshold(&mut self, threshold: i32) {
        self.count_threshold = threshold;
    }

    fn set_irq(&mut self, line: i32, level: i32) {
        self.irq_levels.insert(line, level);
    }

    fn is_irq_set(&self) -> bool {
        self.irq_levels.values().any(|&l| l != 0)
    }

    fn add_breakpoint(&mut self, addr: u32) {
        self.breakpoints.insert(addr);
    }

    fn remove_breakpoint(&mut self, addr: u32) {
        self.breakpoints.remove(&addr);
        if self.last_breakpoint_pc == Some(addr) {
            self.last_breakpoint_pc = None;
        }
    }

    fn attach_log_block_fetch(&mut self, enabled: bool) {
        self.log_block_fetch_enabled = enabled;
    }

    fn set_on_block_translation_enabled(&mut self, enabled: bool) {
        self.block_begin_event_enabled = enabled;
    }

    fn set_translation_cache_size(&mut self, size: usize) {
        self.translation_cache_size = size;
    }

    fn invalidate_translation_cache(&mut self) {}

    fn set_max_block_size(&mut self, size: u32) -> u32 {
        self.max_block_size = size;
        size
    }

    fn get_max_block_size(&self) -> u32 {
        self.max_block_size
    }

    fn restore_context(&mut self) {}

    fn export_state(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(8);
        blob.extend_from_slice(&self.pc.to_le_bytes());
        blob.extend_from_slice(&(self.wfi as u32).to_le_bytes());
        blob
    }

    fn import_state(&mut self, blob: &[u8]) {
        assert_eq!(blob.len(), 8, "mock translator state blob must be 8 bytes");
        self.pc = u32::from_le_bytes(blob[0..4].try_into().unwrap());
        self.wfi = u32::from_le_bytes(blob[4..8].try_into().unwrap()) != 0;
    }
}
