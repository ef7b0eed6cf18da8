//! Policy flags and hardware capability, resolved once

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::backend::DeviceRuntime;
use crate::config::PolicyFlags;

#[derive(Debug, Clone, Copy)]
enum PolicySource {
    Environment,
    Fixed(PolicyFlags),
}

/// Caches the policy flags and virtual memory mapping support
///
/// Both are resolved on first use and never change afterwards. Mapping
/// support is probed on the device the first query names.
#[derive(Debug)]
pub struct CapabilityProbe {
    runtime: Arc<dyn DeviceRuntime>,
    source: PolicySource,
    flags: OnceCell<PolicyFlags>,
    vmm_supported: OnceCell<bool>,
}

impl CapabilityProbe {
    /// Read the flags from the environment on first use
    pub fn from_env(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            runtime,
            source: PolicySource::Environment,
            flags: OnceCell::new(),
            vmm_supported: OnceCell::new(),
        }
    }

    pub fn with_flags(runtime: Arc<dyn DeviceRuntime>, flags: PolicyFlags) -> Self {
        Self {
            runtime,
            source: PolicySource::Fixed(flags),
            flags: OnceCell::new(),
            vmm_supported: OnceCell::new(),
        }
    }

    pub fn flags(&self) -> PolicyFlags {
        *self.flags.get_or_init(|| match self.source {
            PolicySource::Environment => PolicyFlags::from_env(),
            PolicySource::Fixed(flags) => flags,
        })
    }

    pub fn supports_vmm(&self, device: usize) -> bool {
        *self.vmm_supported.get_or_init(|| {
            let supported = self.runtime.supports_virtual_memory(device);
            tracing::debug!(
                "CapabilityProbe: virtual memory mapping {} (probed on device {})",
                if supported { "supported" } else { "unsupported" },
                device
            );
            supported
        })
    }
}
