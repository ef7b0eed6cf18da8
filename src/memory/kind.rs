//! Memory kinds served by the default resources

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MemForgeError;

/// Kind of memory an allocator hands out
///
/// Selects both the allocation semantics and the registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Ordinary pageable host memory
    Host,
    /// Page-locked host memory for fast host/device transfers
    Pinned,
    /// On-device memory of one GPU
    Device,
    /// Unified memory migrated between host and device by the runtime
    Managed,
}

impl MemoryKind {
    /// All kinds, in registry slot order
    pub const ALL: [MemoryKind; 4] = [
        MemoryKind::Host,
        MemoryKind::Pinned,
        MemoryKind::Device,
        MemoryKind::Managed,
    ];

    /// Whether allocations of this kind go through the device runtime
    pub fn uses_runtime(&self) -> bool {
        !matches!(self, MemoryKind::Host)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Host => "host",
            MemoryKind::Pinned => "pinned",
            MemoryKind::Device => "device",
            MemoryKind::Managed => "managed",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = MemForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "host" => Ok(MemoryKind::Host),
            "pinned" => Ok(MemoryKind::Pinned),
            "device" | "gpu" => Ok(MemoryKind::Device),
            "managed" | "unified" => Ok(MemoryKind::Managed),
            other => Err(MemForgeError::InvalidArgument(format!(
                "unknown memory kind: {}",
                other
            ))),
        }
    }
}
