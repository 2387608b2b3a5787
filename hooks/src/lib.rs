//! Breakpoint/hook bookkeeping and the precise-watchpoint pause guard.

pub mod hook_table;
pub mod pause_guard;

pub use hook_table::{HookHandle, HookTable};
pub use pause_guard::PauseGuard;
