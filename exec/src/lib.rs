//! Execution Loop & State Machine: the CPU thread's one function, the
//! pause/resume/step protocol, and the wait-handle plumbing it blocks on.
//!
//! Grounded on `exec/src/exec_loop.rs`'s `cpu_exec_loop` shape and
//! lookup/chain iteration idiom, and on `tb_store.rs`'s `Mutex`-guarded
//! store discipline, reused throughout `loop_`'s fields.

pub mod loop_;
pub mod sync;

pub use loop_::ExecutionLoop;
pub use sync::{ManualResetEvent, StepGate, WakeSet};
