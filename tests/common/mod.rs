//! Shared helpers for the integration tests
//!
//! Every test builds its own [`ResourceRegistry`] over a fresh
//! [`SimulatedRuntime`], so tests do not share slots. Only tests that touch
//! the process-wide registry need `#[serial]`.

#![allow(dead_code)]

use std::sync::Arc;

use memforge::registry::ResourceRegistry;
use memforge::{PolicyFlags, ResourceHandle, SimulatedRuntime};
pub use serial_test::serial;

pub const GRANULE: usize = 64 * 1024;

/// Simulated runtime with `devices` devices and mapping support
pub fn runtime(devices: usize) -> Arc<SimulatedRuntime> {
    Arc::new(
        SimulatedRuntime::builder()
            .devices(devices)
            .granularity(GRANULE)
            .build(),
    )
}

/// Simulated runtime without mapping support
pub fn runtime_without_vmm(devices: usize) -> Arc<SimulatedRuntime> {
    Arc::new(
        SimulatedRuntime::builder()
            .devices(devices)
            .vmm(false)
            .build(),
    )
}

pub fn registry(runtime: &Arc<SimulatedRuntime>, flags: PolicyFlags) -> ResourceRegistry {
    ResourceRegistry::new(runtime.clone(), flags)
}

/// Whether two handles point at the same allocator
pub fn same_resource(a: &ResourceHandle, b: &ResourceHandle) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const u8,
        Arc::as_ptr(b) as *const u8,
    )
}
