/// The CPU's current stepping mode.
///
/// Transitions are observed by the execution loop through
/// `block_size_needs_adjustment`, not polled directly — see
/// `harness-exec::loop_::ExecutionLoop::adjust_block_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Continuous,
    SingleStep,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Continuous
    }
}
