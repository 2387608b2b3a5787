use std::fmt;

/// Recoverable configuration errors. These surface to the immediate
/// caller; the CPU remains usable afterwards.
///
/// Invariant violations (double free, pause ordered without an active
/// guard, ...) are *not* modeled here — they are bugs in a collaborator
/// and are raised with `panic!`/`assert!`.
#[derive(Debug)]
pub enum CpuError {
    /// `Translator::init` returned a negative CPU-type code.
    UnknownCpuType(String),
    /// A `MapMemory`/`UnmapMemory`/page-access call was not page-aligned.
    NotPageAligned { addr: u32, size: u32 },
    /// Two mapped segments would overlap.
    SegmentOverlap { addr: u32, size: u32 },
    /// `Step` was called while `ExecutionMode != SingleStep`.
    StepOutsideSingleStep,
    /// The named disassembler plugin is not registered.
    UnknownDisassembler(String),
    /// The image handed to `InitFromElf`/`InitFromUImage` was malformed.
    MalformedImage(String),
    /// Loading or binding a translator shared object failed: extraction to
    /// disk, `dlopen`, or resolving one of its exported symbols.
    TranslatorLoad(String),
    /// `CpuConfig::load`/`save` or a snapshot load/store failed.
    ConfigIo(String),
}

impl fmt::Display for CpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCpuType(t) => write!(f, "unknown CPU type: {t}"),
            Self::NotPageAligned { addr, size } => write!(
                f,
                "region at {addr:#x} of size {size:#x} is not page-aligned"
            ),
            Self::SegmentOverlap { addr, size } => write!(
                f,
                "segment at {addr:#x} of size {size:#x} overlaps an existing mapping"
            ),
            Self::StepOutsideSingleStep => {
                write!(f, "Step requires ExecutionMode::SingleStep")
            }
            Self::UnknownDisassembler(name) => {
                write!(f, "no disassembler registered under {name:?}")
            }
            Self::MalformedImage(why) => write!(f, "malformed image: {why}"),
            Self::TranslatorLoad(why) => write!(f, "failed to load translator: {why}"),
            Self::ConfigIo(why) => write!(f, "configuration I/O failed: {why}"),
        }
    }
}

impl std::error::Error for CpuError {}
