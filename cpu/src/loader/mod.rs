//! Image loaders for `InitFromElf`/`InitFromUImage`.

pub mod elf;
pub mod uimage;

pub use elf::load_elf;
pub use uimage::load_uimage;
