//! End-to-end scenario tests for the translation CPU harness.
//!
//! Every crate in this workspace (`harness-core`, `harness-mem`,
//! `harness-irq`, `harness-clock`, `harness-hooks`, `harness-exec`,
//! `harness-snapshot`, `harness-disas`) carries its own unit tests next to
//! the code it exercises. What's missing from any single crate's view is
//! the assembled behavior: a `TranslationCpu` built from all of them
//! together, driven the way a real front end would. This crate is that
//! assembly, organized one module per scenario.

pub mod support;

#[cfg(test)]
mod scenario_single_step;
#[cfg(test)]
mod scenario_breakpoint;
#[cfg(test)]
mod scenario_irq_latch;
#[cfg(test)]
mod scenario_watchpoint;
#[cfg(test)]
mod scenario_clock_advance;
#[cfg(test)]
mod scenario_cancellation;
#[cfg(test)]
mod laws;
#[cfg(test)]
mod invariants;
