//! Allocator policy configuration
//!
//! The default resources pick their allocation strategy from three flags. When
//! read from the environment each flag is enabled unless explicitly set to
//! zero; the process-wide registry reads them exactly once.
//!
//! | Variable | Effect |
//! |---|---|
//! | `MEMFORGE_USE_DEVICE_MEM_POOL` | pool device memory instead of plain pass-through |
//! | `MEMFORGE_USE_PINNED_MEM_POOL` | pool pinned memory instead of plain pass-through |
//! | `MEMFORGE_USE_VMM` | with device pooling on and mapping supported, use the growing mapped pool |

use serde::{Deserialize, Serialize};

/// Environment variable enabling the device memory pool
pub const DEVICE_POOL_ENV: &str = "MEMFORGE_USE_DEVICE_MEM_POOL";

/// Environment variable enabling the pinned memory pool
pub const PINNED_POOL_ENV: &str = "MEMFORGE_USE_PINNED_MEM_POOL";

/// Environment variable preferring the virtual-memory-mapped device pool
pub const VMM_ENV: &str = "MEMFORGE_USE_VMM";

/// Number of devices reported by the simulated runtime
pub const SIM_DEVICES_ENV: &str = "MEMFORGE_SIM_DEVICES";

/// Mapping support reported by the simulated runtime
pub const SIM_VMM_ENV: &str = "MEMFORGE_SIM_VMM";

/// Allocation policy flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFlags {
    /// Pool device memory
    pub device_pool: bool,
    /// Pool pinned memory
    pub pinned_pool: bool,
    /// Prefer the mapped pool for device memory (only with `device_pool`)
    pub vmm: bool,
}

impl Default for PolicyFlags {
    fn default() -> Self {
        Self {
            device_pool: true,
            pinned_pool: true,
            vmm: true,
        }
    }
}

impl PolicyFlags {
    /// All flags enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain pass-through allocators everywhere
    pub fn disabled() -> Self {
        Self {
            device_pool: false,
            pinned_pool: false,
            vmm: false,
        }
    }

    /// Read the flags from the environment
    pub fn from_env() -> Self {
        let flags = Self {
            device_pool: env_flag(DEVICE_POOL_ENV),
            pinned_pool: env_flag(PINNED_POOL_ENV),
            vmm: env_flag(VMM_ENV),
        };
        tracing::debug!("PolicyFlags::from_env: {:?}", flags);
        flags
    }

    pub fn with_device_pool(mut self, enabled: bool) -> Self {
        self.device_pool = enabled;
        self
    }

    pub fn with_pinned_pool(mut self, enabled: bool) -> Self {
        self.pinned_pool = enabled;
        self
    }

    pub fn with_vmm(mut self, enabled: bool) -> Self {
        self.vmm = enabled;
        self
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| parse_flag(&v)).unwrap_or(true)
}

/// Interpret a flag value the way C `atoi` would
///
/// Leading whitespace and an optional sign are accepted, then the leading
/// digits decide: zero (or no digits at all) disables, anything else enables.
pub fn parse_flag(value: &str) -> bool {
    let s = value.trim_start();
    let s = s
        .strip_prefix('-')
        .or_else(|| s.strip_prefix('+'))
        .unwrap_or(s);
    s.chars()
        .take_while(|c| c.is_ascii_digit())
        .any(|c| c != '0')
}
