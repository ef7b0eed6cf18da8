//! Teardown guard
//!
//! Destroying an allocator frees memory through the device runtime. During
//! process exit the runtime may already be unloading, and calling into it then
//! is undefined behaviour. Every release path therefore asks the runtime first
//! and, if it is going away, leaks the allocator instead of destroying it.

use std::mem;

use crate::backend::DeviceRuntime;
use crate::memory::{MemoryResource, ResourceHandle};

/// What to do with an allocator that is being released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeakPolicy {
    /// Normal cleanup
    RunDestructor,
    /// Detach without running the destructor; the memory is leaked for good
    Detach,
}

impl LeakPolicy {
    pub fn for_runtime(runtime: &dyn DeviceRuntime) -> Self {
        if runtime.is_unloading() {
            LeakPolicy::Detach
        } else {
            LeakPolicy::RunDestructor
        }
    }
}

/// Drop `handle` unless the runtime is unloading, in which case it is leaked
///
/// Returns the policy that was applied.
pub fn release_guarded(handle: ResourceHandle, runtime: &dyn DeviceRuntime) -> LeakPolicy {
    let policy = LeakPolicy::for_runtime(runtime);
    match policy {
        LeakPolicy::RunDestructor => drop(handle),
        LeakPolicy::Detach => {
            tracing::warn!(
                "release_guarded: {} runtime is unloading, abandoning {} allocator",
                runtime.name(),
                handle.kind()
            );
            mem::forget(handle);
        }
    }
    policy
}
