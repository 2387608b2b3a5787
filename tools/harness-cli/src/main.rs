//! harness-cli — loads a translator shared object and an ELF image, wires
//! them into a `TranslationCpu`, and runs it to completion (or for a fixed
//! number of single steps), printing `Halted` events as they fire.
//!
//! Argument parsing follows `linux-user/src/main.rs` and `tools/irdump`'s
//! manual style rather than reaching for a CLI-parsing crate, since the
//! teacher's own binaries do the same.

use std::env;
use std::fs;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use harness_core::traits::{AccessKind, Endianness, GuestCpuFacts, SystemBus, WordSize};
use harness_core::{ExecutionMode, HaltArguments, HaltReason, RegisterDescriptor, RegisterWidth};
use harness_cpu::TranslationCpu;
use harness_translator::{shared_object_name, NativeTranslator};

struct Args {
    translator_path: String,
    elf_path: String,
    mem_size: u32,
    breakpoints: Vec<u32>,
    watch: Option<u32>,
    step_count: Option<u64>,
}

fn usage() -> ! {
    eprintln!(
        "usage: harness-cli <translator.so> <elf> [options]\n\
         \n\
         Options:\n  \
           --mem-size <hex>   flat bus memory size (default 0x100000)\n  \
           --break <hex>      add a breakpoint at this guest address (repeatable)\n  \
           --watch <hex>      add a read/write watchpoint at this guest address\n  \
           --step <n>         run in SingleStep mode for n instructions instead of Continuous"
    );
    process::exit(1);
}

fn parse_hex(s: &str) -> u32 {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(s, 16).unwrap_or_else(|_| {
        eprintln!("not a hex number: {s:?}");
        process::exit(1);
    })
}

fn parse_args() -> Args {
    let argv: Vec<String> = env::args().collect();
    if argv.len() < 3 {
        usage();
    }
    let mut a = Args {
        translator_path: argv[1].clone(),
        elf_path: argv[2].clone(),
        mem_size: 0x10_0000,
        breakpoints: Vec::new(),
        watch: None,
        step_count: None,
    };
    let mut i = 3;
    while i < argv.len() {
        match argv[i].as_str() {
            "--mem-size" => {
                i += 1;
                a.mem_size = parse_hex(&argv[i]);
            }
            "--break" => {
                i += 1;
                a.breakpoints.push(parse_hex(&argv[i]));
            }
            "--watch" => {
                i += 1;
                a.watch = Some(parse_hex(&argv[i]));
            }
            "--step" => {
                i += 1;
                a.step_count = Some(argv[i].parse().unwrap_or_else(|_| {
                    eprintln!("not a number: {:?}", argv[i]);
                    process::exit(1);
                }));
            }
            other => {
                eprintln!("unrecognized option: {other}");
                usage();
            }
        }
        i += 1;
    }
    a
}

/// The one guest architecture this demo binary knows how to name: a
/// riscv64 front end declaring its identity facts and a minimal `pc`/`gpr`
/// register table. Guest ISA decoding itself stays out of scope; these
/// facts only drive which translator shared object gets loaded and what
/// `registers()` reports.
struct Riscv64Facts;

static REGISTERS: &[RegisterDescriptor] = &[
    RegisterDescriptor::new("pc", 0, RegisterWidth::Bits64, None),
    RegisterDescriptor::new("gpr", 0, RegisterWidth::Bits64, Some("gpr")),
];

impl GuestCpuFacts for Riscv64Facts {
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
        REGISTERS
    }
}

/// A flat byte array standing in for the system bus this demo binary
/// doesn't otherwise have (no SPI/SD/etc peripherals). Reads/writes
/// outside `size` are clamped to the array's last byte rather than
/// panicking, so a wild guest access degrades to wrong results instead of
/// taking the whole process down. `--watch` installs a single
/// watchpointed address to demo the precise-pause protocol.
struct FlatBus {
    memory: Mutex<Vec<u8>>,
    watch: Option<u32>,
}

impl FlatBus {
    fn new(size: u32, watch: Option<u32>) -> Self {
        Self { memory: Mutex::new(vec![0u8; size.max(1) as usize]), watch }
    }

    fn clamp(&self, addr: u32) -> usize {
        let mem = self.memory.lock().unwrap();
        (addr as usize).min(mem.len().saturating_sub(1))
    }
}

impl SystemBus for FlatBus {
    fn read_byte(&self, addr: u32) -> u8 {
        let i = self.clamp(addr);
        self.memory.lock().unwrap()[i]
    }
    fn read_word(&self, addr: u32) -> u16 {
        let i = self.clamp(addr);
        let mem = self.memory.lock().unwrap();
        let hi = (i + 1).min(mem.len() - 1);
        u16::from_le_bytes([mem[i], mem[hi]])
    }
    fn read_dword(&self, addr: u32) -> u32 {
        let i = self.clamp(addr);
        let mem = self.memory.lock().unwrap();
        let mut bytes = [0u8; 4];
        for (k, b) in bytes.iter_mut().enumerate() {
            *b = mem[(i + k).min(mem.len() - 1)];
        }
        u32::from_le_bytes(bytes)
    }
    fn write_byte(&self, addr: u32, value: u8) {
        let i = self.clamp(addr);
        self.memory.lock().unwrap()[i] = value;
    }
    fn write_word(&self, addr: u32, value: u16) {
        let i = self.clamp(addr);
        let mut mem = self.memory.lock().unwrap();
        let hi = (i + 1).min(mem.len() - 1);
        let bytes = value.to_le_bytes();
        mem[i] = bytes[0];
        mem[hi] = bytes[1];
    }
    fn write_dword(&self, addr: u32, value: u32) {
        let i = self.clamp(addr);
        let mut mem = self.memory.lock().unwrap();
        let bytes = value.to_le_bytes();
        for (k, b) in bytes.iter().enumerate() {
            let idx = (i + k).min(mem.len() - 1);
            mem[idx] = *b;
        }
    }
    fn is_watchpoint_at(&self, addr: u32, _access: AccessKind) -> bool {
        self.watch == Some(addr)
    }
}

fn halt_reason_name(reason: HaltReason) -> &'static str {
    match reason {
        HaltReason::Pause => "Pause",
        HaltReason::Step => "Step",
        HaltReason::Abort => "Abort",
        HaltReason::Breakpoint => "Breakpoint",
        HaltReason::Watchpoint => "Watchpoint",
    }
}

fn main() {
    env_logger::init();
    let args = parse_args();

    let so_bytes = fs::read(&args.translator_path).unwrap_or_else(|e| {
        eprintln!("reading {:?}: {e}", args.translator_path);
        process::exit(1);
    });
    let elf_bytes = fs::read(&args.elf_path).unwrap_or_else(|e| {
        eprintln!("reading {:?}: {e}", args.elf_path);
        process::exit(1);
    });

    log::info!(
        "loading translator {} ({} bytes)",
        shared_object_name(WordSize::Bits64, "riscv64", false),
        so_bytes.len()
    );
    let translator = NativeTranslator::load(&so_bytes, WordSize::Bits64).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    let bus = FlatBus::new(args.mem_size, args.watch);
    let cfg = harness_core::CpuConfig::default();
    let cpu = TranslationCpu::new(translator, bus, Riscv64Facts, &cfg, |line| line as i32, 4, 0);
    cpu.init().unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    let halt_count = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&halt_count);
    cpu.on_halted(Box::new(move |args: HaltArguments| {
        counter.fetch_add(1, Ordering::Relaxed);
        println!("halted: {} at pc={:#x}", halt_reason_name(args.reason), args.pc);
    }));

    for addr in &args.breakpoints {
        let addr = *addr;
        cpu.add_hook(addr, Arc::new(move |pc| println!("breakpoint hit at {pc:#x}")));
    }

    let entry = cpu.init_from_elf(&elf_bytes).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });
    log::info!("entry point {entry:#x}");

    if let Some(count) = args.step_count {
        cpu.set_execution_mode(ExecutionMode::SingleStep);
        cpu.resume();
        if let Err(e) = cpu.step(count) {
            eprintln!("{e}");
        }
        cpu.pause();
    } else {
        cpu.resume();
        while !cpu.is_halted() {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        cpu.pause();
    }

    println!("executed {} instructions, {} halt event(s)", cpu.executed_instructions(), halt_count.load(Ordering::Relaxed));
    cpu.dispose();
}
