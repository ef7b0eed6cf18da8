//! memforge - default memory resources for AMD GPUs
//!
//! A process-wide registry of lazily built, shared allocators for host,
//! pinned, device and managed memory. Strategies (plain pass-through, cached
//! pool, mapped device pool) are picked from the `MEMFORGE_*` policy flags and
//! what the device supports. Without the `rocm` feature every device call goes
//! to a host-backed simulated runtime.

#![allow(clippy::missing_safety_doc)] // FFI bindings documented at module level

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod registry;

pub use backend::{default_runtime, DeviceRuntime, SimulatedRuntime};
pub use config::PolicyFlags;
pub use error::{ErrorCategory, MemForgeError, MemResult};
pub use memory::{MemoryKind, MemoryResource, PoolCapability, ResourceHandle};
pub use registry::defaults::{
    get_default, preallocate, release_unused_memory, set_default, set_default_raw, share_default,
    shutdown, RawResource,
};
pub use registry::{AllocatorStrategy, ResourceRegistry};
