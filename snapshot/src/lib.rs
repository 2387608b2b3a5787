//! Snapshot & Lifecycle: the on-disk envelope and its `serde` + `bincode`
//! round trip.
//!
//! Grounded on `oxidecomputer-hubris/cfpa-update`'s pairing of `serde` +
//! `bincode` for a structured-plus-raw-blob device configuration: `CpuConfig`
//! is the structured half, `translator_state` is the opaque half.
//!
//! The on-disk state is exactly the three fields below — "transient"
//! fields (thread handle, wait handles, memory manager, binder, timer) are
//! deliberately excluded here and are instead reconstructed by
//! `harness-cpu`'s late-post-deserialization routine from whatever the live
//! `TranslationCpu` instance already holds (the memory-map registry and
//! hook table are never serialized; they are replayed against the freshly
//! reloaded translator in place).

use harness_core::{CpuConfig, CpuError};
use serde::{Deserialize, Serialize};

/// The serializable envelope. `translator_state` is the translator's
/// opaque blob, exactly `get_state_size` bytes at the time it was
/// exported; this crate never inspects its contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub config: CpuConfig,
    pub irq_latches: Vec<bool>,
    pub translator_state: Vec<u8>,
}

impl Snapshot {
    pub fn new(config: CpuConfig, irq_latches: Vec<bool>, translator_state: Vec<u8>) -> Self {
        Self { config, irq_latches, translator_state }
    }

    /// Serializes the envelope with `bincode`, matching `cfpa-update`'s
    /// on-disk form for exactly this kind of structured-plus-raw blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CpuError> {
        bincode::serialize(self).map_err(|e| CpuError::ConfigIo(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CpuError> {
        bincode::deserialize(bytes).map_err(|e| CpuError::ConfigIo(e.to_string()))
    }

    /// Writes the serialized envelope to `path`.
    pub fn save(&self, path: &std::path::Path) -> Result<(), CpuError> {
        let bytes = self.to_bytes()?;
        log::debug!("saving snapshot to {path:?} ({} bytes)", bytes.len());
        std::fs::write(path, bytes).map_err(|e| CpuError::ConfigIo(e.to_string()))
    }

    pub fn load(path: &std::path::Path) -> Result<Self, CpuError> {
        let bytes = std::fs::read(path).map_err(|e| CpuError::ConfigIo(e.to_string()))?;
        log::debug!("loading snapshot from {path:?} ({} bytes)", bytes.len());
        Self::from_bytes(&bytes)
    }
}

/// Front-end-supplied lifecycle hooks around a snapshot's save/load
/// boundary. The harness calls `before_save` right before serializing and
/// `after_load` right after deserializing, without needing to know what
/// either one does.
pub trait SnapshotHooks {
    fn before_save(&self) {}
    fn after_load(&self) {}
}
