//! Device runtime seam
//!
//! Everything the default resources need from the GPU runtime goes through
//! [`DeviceRuntime`]: device queries, the per-thread current device, raw
//! allocation of pinned/device/managed memory, events, and the "runtime is
//! unloading" signal used by the teardown guard.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::MemResult;
use crate::memory::MemoryKind;

/// Opaque runtime event handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeEvent(pub usize);

/// Device runtime primitives
///
/// Current-device state is per calling thread, as in HIP.
pub trait DeviceRuntime: Send + Sync + fmt::Debug {
    /// Short name used in logs and the CLI
    fn name(&self) -> &str;

    /// Initialize the runtime on the calling thread's current device.
    /// Safe to call more than once.
    fn init(&self) -> MemResult<()>;

    /// Number of devices visible to the process
    fn device_count(&self) -> MemResult<usize>;

    /// Current device of the calling thread
    fn current_device(&self) -> MemResult<usize>;

    /// Make `device` current for the calling thread
    fn set_device(&self, device: usize) -> MemResult<()>;

    /// Whether the runtime has started unloading (process exit in progress)
    fn is_unloading(&self) -> bool;

    /// Whether `device` supports virtual memory mapping
    fn supports_virtual_memory(&self, device: usize) -> bool;

    /// Granularity, in bytes, of virtual memory mappings
    fn vm_granularity(&self) -> usize {
        2 << 20
    }

    /// Allocate raw memory of `kind`. Device memory lands on the current device.
    /// Host memory is never requested through the runtime.
    fn malloc(&self, kind: MemoryKind, size: usize) -> MemResult<NonNull<u8>>;

    /// Free memory obtained from [`DeviceRuntime::malloc`]
    ///
    /// # Safety
    ///
    /// `ptr` must come from `malloc` on this runtime with the same `kind` and
    /// must not be used afterwards.
    unsafe fn free(&self, kind: MemoryKind, ptr: NonNull<u8>) -> MemResult<()>;

    /// Create a synchronization-only event
    fn create_event(&self) -> MemResult<RuntimeEvent>;

    /// Destroy an event
    ///
    /// # Safety
    ///
    /// `event` must come from `create_event` on this runtime and must not be
    /// used afterwards.
    unsafe fn destroy_event(&self, event: RuntimeEvent) -> MemResult<()>;
}

/// Runtime used by the process-wide registry
///
/// With the `rocm` feature this is the HIP runtime. Otherwise a host-backed
/// [`SimulatedRuntime`](crate::backend::SimulatedRuntime) configured from
/// `MEMFORGE_SIM_DEVICES` and `MEMFORGE_SIM_VMM`.
pub fn default_runtime() -> Arc<dyn DeviceRuntime> {
    #[cfg(feature = "rocm")]
    {
        Arc::new(crate::backend::hip_backend::HipRuntime::new())
    }
    #[cfg(not(feature = "rocm"))]
    {
        Arc::new(crate::backend::SimulatedRuntime::from_env())
    }
}
