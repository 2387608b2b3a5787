//! Shared fixtures for the scenario tests: a guest identity, a flat RAM
//! bus with an optional watchpoint address, and a `TranslationCpu`
//! builder wired the same way a real front end would wire one, just with
//! `MockTranslator` standing in for a per-architecture `.so`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use harness_core::traits::{AccessKind, Endianness, GuestCpuFacts, SystemBus, WordSize};
use harness_core::{CpuConfig, RegisterDescriptor};
use harness_cpu::TranslationCpu;
use harness_translator::mock::MockTranslator;

pub struct TestFacts;

impl GuestCpuFacts for TestFacts {
    fn word_size(&self) -> WordSize {
        WordSize::Bits64
    }
    fn architecture(&self) -> &'static str {
        "riscv64"
    }
    fn endianness(&self) -> Endianness {
        Endianness::Little
    }
    fn model(&self) -> &'static str {
        "generic-rv64"
    }
    fn cpu_type(&self) -> &'static str {
        "riscv64"
    }
    fn registers(&self) -> &'static [RegisterDescriptor] {
        &[]
    }
}

/// A flat byte-addressed RAM bus with a single settable watchpoint
/// address. No watchpoint is armed unless `set_watchpoint` is called.
pub struct RamBus {
    memory: Mutex<Vec<u8>>,
    watchpoint: AtomicU32,
}

const NO_WATCHPOINT: u32 = u32::MAX;

impl RamBus {
    pub fn new(size: usize) -> Self {
        Self { memory: Mutex::new(vec![0; size]), watchpoint: AtomicU32::new(NO_WATCHPOINT) }
    }

    pub fn set_watchpoint(&self, addr: u32) {
        self.watchpoint.store(addr, Ordering::SeqCst);
    }
}

impl SystemBus for RamBus {
    fn read_byte(&self, addr: u32) -> u8 {
        self.memory.lock().unwrap()[addr as usize]
    }
    fn read_word(&self, addr: u32) -> u16 {
        let mem = self.memory.lock().unwrap();
        u16::from_le_bytes([mem[addr as usize], mem[addr as usize + 1]])
    }
    fn read_dword(&self, addr: u32) -> u32 {
        let mem = self.memory.lock().unwrap();
        let a = addr as usize;
        u32::from_le_bytes([mem[a], mem[a + 1], mem[a + 2], mem[a + 3]])
    }
    fn write_byte(&self, addr: u32, value: u8) {
        self.memory.lock().unwrap()[addr as usize] = value;
    }
    fn write_word(&self, addr: u32, value: u16) {
        let mut mem = self.memory.lock().unwrap();
        mem[addr as usize..addr as usize + 2].copy_from_slice(&value.to_le_bytes());
    }
    fn write_dword(&self, addr: u32, value: u32) {
        let mut mem = self.memory.lock().unwrap();
        mem[addr as usize..addr as usize + 4].copy_from_slice(&value.to_le_bytes());
    }
    fn is_watchpoint_at(&self, addr: u32, _access: AccessKind) -> bool {
        self.watchpoint.load(Ordering::SeqCst) == addr
    }
}

/// Assembles and initializes a `TranslationCpu` from an already-programmed
/// `MockTranslator` and a bus. The translator's program must be set up
/// before calling this: once wrapped, the execution loop owns it and a
/// front end only ever reaches it again through `execute()`, exactly as a
/// real `.so` would allow no direct access either.
pub fn build_cpu(translator: MockTranslator, bus: RamBus) -> TranslationCpu<MockTranslator, RamBus, TestFacts> {
    let cfg = CpuConfig::default();
    let cpu = TranslationCpu::new(translator, bus, TestFacts, &cfg, |line| line as i32, 4, 0);
    cpu.init().unwrap();
    cpu
}
