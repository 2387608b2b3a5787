//! Legacy U-Boot image (`uImage`) entry-point + payload loader.
//!
//! Same shape as `loader::elf`: a `#[repr(C)]` header struct read straight
//! out of the byte slice, a `validate` pass against the guest CPU's
//! declared architecture, then a single host-memory arena sized to the
//! payload and mapped in one `MapMemory` call. The header is big-endian
//! (network byte order), unlike ELF's mixed-endian-by-`e_ident` scheme, so
//! every multi-byte field is read with `from_be_bytes` rather than cast
//! through a packed struct.
use std::fmt;

use harness_core::traits::{GuestCpuFacts, SystemBus, Translator};
use harness_core::CpuError;
use harness_exec::ExecutionLoop;

const IH_MAGIC: u32 = 0x2705_1956;
const IH_COMP_NONE: u8 = 0;
const HEADER_SIZE: usize = 64;
const IH_NMLEN: usize = 32;

/// Subset of U-Boot's `IH_ARCH_*` constants, mapped to the
/// `GuestCpuFacts::architecture()` name a front end would declare.
const KNOWN_ARCHES: &[(u8, &str)] = &[
    (2, "arm"),
    (22, "aarch64"),
    (3, "x86"),
    (24, "x86_64"),
    (26, "riscv32"),
    (26, "riscv64"),
];

#[derive(Debug)]
pub enum UImageError {
    TooSmall,
    InvalidMagic,
    UnsupportedArch { ih_arch: u8, expected: &'static str },
    UnsupportedCompression { ih_comp: u8 },
    TruncatedPayload,
}

impl fmt::Display for UImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall => write!(f, "file too small to be a uImage header"),
            Self::InvalidMagic => write!(f, "invalid uImage magic"),
            Self::UnsupportedArch { ih_arch, expected } => {
                write!(f, "ih_arch {ih_arch} does not match guest architecture {expected:?}")
            }
            Self::UnsupportedCompression { ih_comp } => {
                write!(f, "unsupported compression type {ih_comp} (only uncompressed images are loaded)")
            }
            Self::TruncatedPayload => write!(f, "payload shorter than ih_size"),
        }
    }
}

impl std::error::Error for UImageError {}

impl From<UImageError> for CpuError {
    fn from(e: UImageError) -> Self {
        CpuError::MalformedImage(e.to_string())
    }
}

struct Header {
    size: u32,
    load: u32,
    entry_point: u32,
    arch: u8,
    comp: u8,
}

impl Header {
    fn parse(data: &[u8], facts: &dyn GuestCpuFacts) -> Result<Self, UImageError> {
        if data.len() < HEADER_SIZE {
            return Err(UImageError::TooSmall);
        }
        let magic = u32::from_be_bytes(data[0..4].try_into().unwrap());
        if magic != IH_MAGIC {
            return Err(UImageError::InvalidMagic);
        }
        let size = u32::from_be_bytes(data[12..16].try_into().unwrap());
        let load = u32::from_be_bytes(data[16..20].try_into().unwrap());
        let entry_point = u32::from_be_bytes(data[20..24].try_into().unwrap());
        let arch = data[28 + IH_OS_LEN];
        let comp = data[28 + IH_OS_LEN + 2];

        let expected = facts.architecture();
        let recognized = KNOWN_ARCHES.iter().any(|&(a, name)| a == arch && name == expected);
        if !recognized {
            return Err(UImageError::UnsupportedArch { ih_arch: arch, expected });
        }
        if comp != IH_COMP_NONE {
            return Err(UImageError::UnsupportedCompression { ih_comp: comp });
        }
        Ok(Self { size, load, entry_point, arch, comp })
    }
}

// Byte offsets within the 64-byte header, laid out as ih_magic, ih_hcrc,
// ih_time, ih_size, ih_load, ih_ep, ih_dcrc (7 x u32 = 28 bytes), then
// ih_os, ih_arch, ih_type, ih_comp (4 x u8), then ih_name[32].
const IH_OS_LEN: usize = 1;

const _: () = assert!(28 + 1 + 1 + 1 + 1 + IH_NMLEN == HEADER_SIZE);

/// Parses `bytes` as a legacy uImage, maps its (uncompressed) payload at
/// `ih_load`, and returns the (possibly Redirector-resolved) entry point
/// `ih_ep`. Compressed images (`gzip`/`lzo`/...) are rejected rather than
/// silently loaded raw — decompression is out of scope for this loader.
pub fn load_uimage<T: Translator, B: SystemBus>(
    bytes: &[u8],
    facts: &dyn GuestCpuFacts,
    exec: &ExecutionLoop<T, B>,
) -> Result<u64, CpuError> {
    let header = Header::parse(bytes, facts).map_err(UImageErrorExt::from_into)?;
    let payload = bytes
        .get(HEADER_SIZE..HEADER_SIZE + header.size as usize)
        .ok_or(UImageError::TruncatedPayload)
        .map_err(UImageErrorExt::from_into)?;

    let page_size = exec.guest_page_size().max(1);
    let align_down = |addr: u32| addr & !(page_size - 1);
    let align_up = |addr: u32| align_down(addr.saturating_add(page_size - 1));

    let span_start = align_down(header.load);
    let span_end = align_up(header.load + payload.len() as u32);
    let span_size = (span_end - span_start) as usize;

    let host_ptr = exec.allocate_host_memory(span_size);
    // SAFETY: `host_ptr` was just allocated with exactly `span_size` bytes
    // and is not yet visible to any other thread.
    let arena = unsafe { std::slice::from_raw_parts_mut(host_ptr as *mut u8, span_size) };
    arena.fill(0);
    let offset = (header.load - span_start) as usize;
    arena[offset..offset + payload.len()].copy_from_slice(payload);

    exec.map_memory(span_start, span_size as u32, host_ptr)?;

    let entry = exec.resolve_redirect(header.entry_point as u64).unwrap_or(header.entry_point as u64);
    exec.set_pc(entry);
    let _ = header.arch;
    let _ = header.comp;
    Ok(entry)
}

trait UImageErrorExt {
    fn from_into(self) -> CpuError;
}

impl UImageErrorExt for UImageError {
    fn from_into(self) -> CpuError {
        self.into()
    }
}
