use serde::{Deserialize, Serialize};

use crate::error::CpuError;

/// Default translation cache size: 32 MiB.
pub const DEFAULT_TRANSLATION_CACHE_SIZE: usize = 32 * 1024 * 1024;
/// Default maximum block size.
pub const DEFAULT_MAX_BLOCK_SIZE: u32 = 0x7FF;
/// Default instruction-count threshold.
pub const DEFAULT_COUNT_THRESHOLD: i32 = 5000;
/// Default MIPS divisor converting retired instructions to virtual clock
/// ticks.
pub const DEFAULT_PERFORMANCE_IN_MIPS: u32 = 100;

/// Serializable snapshot of the CPU's configurable, non-opaque properties.
///
/// This is additive: every field here is still a plain property on
/// `TranslationCpu`. `CpuConfig` exists purely so the subset of state
/// meaningful to persist *outside* of a full state snapshot (cache sizing,
/// thresholds, boolean toggles) can be loaded from or saved to a flat
/// JSON blob, mirroring the way `cfpa-update` round-trips a device
/// configuration blob through `serde` + `serde_json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpuConfig {
    pub translation_cache_size: usize,
    pub maximum_block_size: u32,
    pub count_threshold: i32,
    pub performance_in_mips: u32,
    pub advance_immediately: bool,
    pub thread_sentinel_enabled: bool,
    pub disable_interrupts_while_stepping: bool,
    pub update_context_on_load_and_store: bool,
    pub log_translation_block_fetch: bool,
    pub log_translated_blocks: bool,
    pub log_file: Option<String>,
    pub disassembler: Option<String>,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            translation_cache_size: DEFAULT_TRANSLATION_CACHE_SIZE,
            maximum_block_size: DEFAULT_MAX_BLOCK_SIZE,
            count_threshold: DEFAULT_COUNT_THRESHOLD,
            performance_in_mips: DEFAULT_PERFORMANCE_IN_MIPS,
            advance_immediately: false,
            thread_sentinel_enabled: false,
            disable_interrupts_while_stepping: false,
            update_context_on_load_and_store: false,
            log_translation_block_fetch: false,
            log_translated_blocks: false,
            log_file: None,
            disassembler: None,
        }
    }
}

impl CpuConfig {
    /// Renders this configuration as a flat JSON blob, the way
    /// `cfpa-update` round-trips its device configuration through
    /// `serde_json`.
    pub fn to_json(&self) -> Result<String, CpuError> {
        serde_json::to_string_pretty(self).map_err(|e| CpuError::ConfigIo(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, CpuError> {
        serde_json::from_str(text).map_err(|e| CpuError::ConfigIo(e.to_string()))
    }
}
