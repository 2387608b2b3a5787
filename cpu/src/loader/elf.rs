//! ELF64 entry-point + `PT_LOAD` segment loader.
//!
//! Generalized from `linux-user/src/elf.rs`, which hardcoded validation to
//! RISC-V (`EM_RISCV`/`ET_EXEC` only): this version checks
//! the machine field against whatever `GuestCpuFacts::architecture()` the
//! caller's CPU declares, since cross-ISA *loading* is in scope even though
//! cross-ISA codegen is not. The header/program-header struct layout and
//! the unsafe-cast parsing idiom are carried over unchanged.

use std::fmt;
use std::mem;

use harness_core::traits::{GuestCpuFacts, SystemBus, Translator};
use harness_core::CpuError;
use harness_exec::ExecutionLoop;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;
const EV_CURRENT: u8 = 1;

pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

pub const PT_LOAD: u32 = 1;

/// Machine-agnostic subset of `e_machine` values this loader recognizes,
/// mapped to the `GuestCpuFacts::architecture()` name a front end would
/// declare for that ISA.
const KNOWN_MACHINES: &[(u16, &str)] = &[
    (243, "riscv64"),
    (243, "riscv32"),
    (183, "aarch64"),
    (40, "arm"),
    (62, "x86_64"),
    (3, "x86"),
];

#[derive(Debug)]
pub enum ElfError {
    TooSmall,
    InvalidMagic,
    UnsupportedClass,
    UnsupportedEndian,
    UnsupportedMachine { e_machine: u16, expected: &'static str },
    UnsupportedType,
    InvalidPhdr,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall => write!(f, "file too small to be an ELF header"),
            Self::InvalidMagic => write!(f, "invalid ELF magic"),
            Self::UnsupportedClass => write!(f, "unsupported ELF class"),
            Self::UnsupportedEndian => write!(f, "endianness does not match the guest CPU"),
            Self::UnsupportedMachine { e_machine, expected } => {
                write!(f, "e_machine {e_machine} does not match guest architecture {expected:?}")
            }
            Self::UnsupportedType => write!(f, "not ET_EXEC or ET_DYN"),
            Self::InvalidPhdr => write!(f, "invalid program header table"),
        }
    }
}

impl std::error::Error for ElfError {}

impl From<ElfError> for CpuError {
    fn from(e: ElfError) -> Self {
        CpuError::MalformedImage(e.to_string())
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64Ehdr {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64Phdr {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

impl Elf64Ehdr {
    fn from_bytes(data: &[u8]) -> Result<&Self, ElfError> {
        if data.len() < mem::size_of::<Self>() {
            return Err(ElfError::TooSmall);
        }
        // SAFETY: length checked above; `Elf64Ehdr` has no invalid bit
        // patterns and every field is byte-addressable.
        Ok(unsafe { &*(data.as_ptr() as *const Self) })
    }

    fn validate(&self, facts: &dyn GuestCpuFacts) -> Result<(), ElfError> {
        if self.e_ident[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if self.e_ident[4] != ELFCLASS64 && self.e_ident[4] != ELFCLASS32 {
            return Err(ElfError::UnsupportedClass);
        }
        let expected_endian = match facts.endianness() {
            harness_core::Endianness::Little => ELFDATA2LSB,
            harness_core::Endianness::Big => ELFDATA2MSB,
        };
        if self.e_ident[5] != expected_endian {
            return Err(ElfError::UnsupportedEndian);
        }
        if self.e_ident[6] != EV_CURRENT {
            return Err(ElfError::InvalidMagic);
        }
        let expected = facts.architecture();
        let recognized = KNOWN_MACHINES.iter().any(|&(m, name)| m == self.e_machine && name == expected);
        if !recognized {
            return Err(ElfError::UnsupportedMachine { e_machine: self.e_machine, expected });
        }
        if self.e_type != ET_EXEC && self.e_type != ET_DYN {
            return Err(ElfError::UnsupportedType);
        }
        Ok(())
    }

    fn program_headers<'a>(&self, data: &'a [u8]) -> Result<&'a [Elf64Phdr], ElfError> {
        let off = self.e_phoff as usize;
        let num = self.e_phnum as usize;
        let ent = self.e_phentsize as usize;
        if ent < mem::size_of::<Elf64Phdr>() {
            return Err(ElfError::InvalidPhdr);
        }
        let end = off
            .checked_add(num.checked_mul(ent).ok_or(ElfError::InvalidPhdr)?)
            .ok_or(ElfError::InvalidPhdr)?;
        if end > data.len() {
            return Err(ElfError::InvalidPhdr);
        }
        // SAFETY: bounds checked above, repr(C) struct, no padding read.
        let phdrs = unsafe { std::slice::from_raw_parts(data[off..].as_ptr() as *const Elf64Phdr, num) };
        Ok(phdrs)
    }
}

fn align_down(addr: u64, align: u64) -> u64 {
    addr & !(align - 1)
}

fn align_up(addr: u64, align: u64) -> u64 {
    align_down(addr + align - 1, align)
}

/// Parses `bytes` as an ELF64 image, loads every `PT_LOAD` segment into one
/// contiguous host-memory arena sized to their combined span (avoiding the
/// overlapping-page `MapMemory` rejections that one call per segment would
/// risk), maps it, and returns the (possibly Redirector-resolved) entry
/// point. Mirrors `linux-user/src/guest_space.rs`'s one-arena-per-image
/// shape without replicating its Linux-ABI stack/argv/auxv setup, which is
/// out of scope here — only the entry-point hand-off is specified.
pub fn load_elf<T: Translator, B: SystemBus>(
    bytes: &[u8],
    facts: &dyn GuestCpuFacts,
    exec: &ExecutionLoop<T, B>,
) -> Result<u64, CpuError> {
    let ehdr = Elf64Ehdr::from_bytes(bytes).map_err(ElfError::from_into)?;
    ehdr.validate(facts).map_err(ElfError::from_into)?;
    let phdrs = ehdr.program_headers(bytes).map_err(ElfError::from_into)?;

    let loadable: Vec<&Elf64Phdr> = phdrs.iter().filter(|p| p.p_type == PT_LOAD).collect();
    if !loadable.is_empty() {
        let page_size = exec.guest_page_size().max(1) as u64;
        let span_start = loadable.iter().map(|p| align_down(p.p_vaddr, page_size)).min().unwrap();
        let span_end = loadable
            .iter()
            .map(|p| align_up(p.p_vaddr + p.p_memsz, page_size))
            .max()
            .unwrap();
        let span_size = (span_end - span_start) as usize;

        let host_ptr = exec.allocate_host_memory(span_size);
        // SAFETY: `host_ptr` was just allocated with exactly `span_size`
        // bytes and is not yet visible to any other thread.
        let arena = unsafe { std::slice::from_raw_parts_mut(host_ptr as *mut u8, span_size) };
        arena.fill(0);

        for phdr in &loadable {
            let file_start = phdr.p_offset as usize;
            let file_end = file_start + phdr.p_filesz as usize;
            let file_bytes = bytes.get(file_start..file_end).ok_or(CpuError::MalformedImage(
                "PT_LOAD file range exceeds image size".to_string(),
            ))?;
            let arena_offset = (phdr.p_vaddr - span_start) as usize;
            arena[arena_offset..arena_offset + file_bytes.len()].copy_from_slice(file_bytes);
        }

        exec.map_memory(span_start as u32, span_size as u32, host_ptr)?;
    }

    let entry = exec.resolve_redirect(ehdr.e_entry).unwrap_or(ehdr.e_entry);
    exec.set_pc(entry);
    Ok(entry)
}

trait ElfErrorExt {
    fn from_into(self) -> CpuError;
}

impl ElfErrorExt for ElfError {
    fn from_into(self) -> CpuError {
        self.into()
    }
}
