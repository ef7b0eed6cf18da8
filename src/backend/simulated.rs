//! Host-backed device runtime
//!
//! Stands in for the HIP runtime on machines without a GPU and in tests.
//! "Device", "pinned" and "managed" blocks are ordinary host allocations, but
//! the runtime keeps the same contract as HIP: a fixed device count, a
//! per-thread current device, events, and an unloading signal. Every call is
//! counted so tests can assert how often the registry touched the runtime.
//!
//! # Failure injection
//!
//! [`SimulatedRuntime::set_fail_device_queries`] and
//! [`SimulatedRuntime::set_fail_allocations`] make the corresponding calls
//! return [`MemForgeError::RuntimeCall`], which exercises the
//! "construction failed, slot stays empty" paths.

use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::backend::{DeviceRuntime, RuntimeEvent};
use crate::config::{parse_flag, SIM_DEVICES_ENV, SIM_VMM_ENV};
use crate::error::{MemForgeError, MemResult};
use crate::memory::{MemoryKind, DEFAULT_ALIGNMENT};

/// Error code reported for injected failures (hipErrorOutOfMemory)
const INJECTED_FAILURE_CODE: i32 = 2;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Current device per simulated runtime instance, for this thread
    static CURRENT_DEVICE: RefCell<HashMap<u64, usize>> = RefCell::new(HashMap::new());
}

fn kind_index(kind: MemoryKind) -> usize {
    match kind {
        MemoryKind::Host => 0,
        MemoryKind::Pinned => 1,
        MemoryKind::Device => 2,
        MemoryKind::Managed => 3,
    }
}

#[derive(Debug)]
struct Allocation {
    kind: MemoryKind,
    device: Option<usize>,
    layout: Layout,
}

#[derive(Debug, Default)]
struct KindCounters {
    allocations: AtomicUsize,
    frees: AtomicUsize,
    live_bytes: AtomicUsize,
}

/// Builder for [`SimulatedRuntime`]
#[derive(Debug, Clone)]
pub struct SimulatedRuntimeBuilder {
    devices: usize,
    vmm: bool,
    granularity: usize,
}

impl Default for SimulatedRuntimeBuilder {
    fn default() -> Self {
        Self {
            devices: 1,
            vmm: true,
            granularity: 2 << 20,
        }
    }
}

impl SimulatedRuntimeBuilder {
    /// Number of devices reported by `device_count`
    pub fn devices(mut self, devices: usize) -> Self {
        self.devices = devices;
        self
    }

    /// Whether devices report virtual memory mapping support
    pub fn vmm(mut self, vmm: bool) -> Self {
        self.vmm = vmm;
        self
    }

    /// Mapping granularity in bytes (rounded up to a power of two)
    pub fn granularity(mut self, granularity: usize) -> Self {
        self.granularity = granularity.max(DEFAULT_ALIGNMENT).next_power_of_two();
        self
    }

    pub fn build(self) -> SimulatedRuntime {
        SimulatedRuntime {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            devices: self.devices,
            vmm: self.vmm,
            granularity: self.granularity,
            unloading: AtomicBool::new(false),
            fail_device_queries: AtomicBool::new(false),
            fail_allocations: AtomicBool::new(false),
            init_calls: AtomicUsize::new(0),
            device_count_queries: AtomicUsize::new(0),
            counters: Default::default(),
            live: Mutex::new(HashMap::new()),
            next_event: AtomicUsize::new(1),
            events: Mutex::new(HashSet::new()),
            events_created: AtomicUsize::new(0),
        }
    }
}

/// Host-backed implementation of [`DeviceRuntime`]
#[derive(Debug)]
pub struct SimulatedRuntime {
    id: u64,
    devices: usize,
    vmm: bool,
    granularity: usize,
    unloading: AtomicBool,
    fail_device_queries: AtomicBool,
    fail_allocations: AtomicBool,
    init_calls: AtomicUsize,
    device_count_queries: AtomicUsize,
    counters: [KindCounters; 4],
    live: Mutex<HashMap<usize, Allocation>>,
    next_event: AtomicUsize,
    events: Mutex<HashSet<usize>>,
    events_created: AtomicUsize,
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        SimulatedRuntimeBuilder::default().build()
    }
}

impl SimulatedRuntime {
    pub fn builder() -> SimulatedRuntimeBuilder {
        SimulatedRuntimeBuilder::default()
    }

    /// Configure from `MEMFORGE_SIM_DEVICES` (default 1) and
    /// `MEMFORGE_SIM_VMM` (default enabled)
    pub fn from_env() -> Self {
        let devices = std::env::var(SIM_DEVICES_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(1);
        let vmm = std::env::var(SIM_VMM_ENV)
            .map(|v| parse_flag(&v))
            .unwrap_or(true);
        tracing::debug!(
            "SimulatedRuntime::from_env: devices={}, vmm={}",
            devices,
            vmm
        );
        Self::builder().devices(devices).vmm(vmm).build()
    }

    /// Flip the unloading signal, as the HIP runtime does during process exit
    pub fn set_unloading(&self, unloading: bool) {
        self.unloading.store(unloading, Ordering::Release);
    }

    /// Make `device_count`/`current_device` fail
    pub fn set_fail_device_queries(&self, fail: bool) {
        self.fail_device_queries.store(fail, Ordering::Release);
    }

    /// Make `malloc` fail
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::Release);
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::Acquire)
    }

    pub fn device_count_queries(&self) -> usize {
        self.device_count_queries.load(Ordering::Acquire)
    }

    /// Number of successful `malloc` calls for `kind`
    pub fn allocations(&self, kind: MemoryKind) -> usize {
        self.counters[kind_index(kind)]
            .allocations
            .load(Ordering::Acquire)
    }

    /// Number of successful `free` calls for `kind`
    pub fn frees(&self, kind: MemoryKind) -> usize {
        self.counters[kind_index(kind)].frees.load(Ordering::Acquire)
    }

    /// Bytes of `kind` currently allocated and not freed
    pub fn live_bytes(&self, kind: MemoryKind) -> usize {
        self.counters[kind_index(kind)]
            .live_bytes
            .load(Ordering::Acquire)
    }

    /// Live allocations on `device` (device kind only)
    pub fn live_device_allocations(&self, device: usize) -> usize {
        self.live
            .lock()
            .map(|live| {
                live.values()
                    .filter(|a| a.kind == MemoryKind::Device && a.device == Some(device))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn live_events(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn events_created(&self) -> usize {
        self.events_created.load(Ordering::Acquire)
    }

    fn injected(&self, call: &'static str) -> MemForgeError {
        MemForgeError::RuntimeCall {
            call,
            code: INJECTED_FAILURE_CODE,
            message: "injected failure".to_string(),
        }
    }

    fn current_raw(&self) -> usize {
        CURRENT_DEVICE.with(|map| map.borrow().get(&self.id).copied().unwrap_or(0))
    }
}

impl DeviceRuntime for SimulatedRuntime {
    fn name(&self) -> &str {
        "simulated"
    }

    fn init(&self) -> MemResult<()> {
        self.init_calls.fetch_add(1, Ordering::AcqRel);
        if self.devices == 0 {
            return Err(MemForgeError::DeviceNotFound);
        }
        Ok(())
    }

    fn device_count(&self) -> MemResult<usize> {
        if self.fail_device_queries.load(Ordering::Acquire) {
            return Err(self.injected("hipGetDeviceCount"));
        }
        self.device_count_queries.fetch_add(1, Ordering::AcqRel);
        Ok(self.devices)
    }

    fn current_device(&self) -> MemResult<usize> {
        if self.fail_device_queries.load(Ordering::Acquire) {
            return Err(self.injected("hipGetDevice"));
        }
        if self.devices == 0 {
            return Err(MemForgeError::DeviceNotFound);
        }
        Ok(self.current_raw())
    }

    fn set_device(&self, device: usize) -> MemResult<()> {
        if device >= self.devices {
            return Err(MemForgeError::RuntimeCall {
                call: "hipSetDevice",
                code: 101, // hipErrorInvalidDevice
                message: format!("invalid device ordinal {}", device),
            });
        }
        CURRENT_DEVICE.with(|map| {
            map.borrow_mut().insert(self.id, device);
        });
        Ok(())
    }

    fn is_unloading(&self) -> bool {
        self.unloading.load(Ordering::Acquire)
    }

    fn supports_virtual_memory(&self, device: usize) -> bool {
        self.vmm && device < self.devices
    }

    fn vm_granularity(&self) -> usize {
        self.granularity
    }

    fn malloc(&self, kind: MemoryKind, size: usize) -> MemResult<NonNull<u8>> {
        if kind == MemoryKind::Host {
            return Err(MemForgeError::InvalidArgument(
                "host memory is not allocated through the device runtime".to_string(),
            ));
        }
        if self.fail_allocations.load(Ordering::Acquire) {
            return Err(self.injected("hipMalloc"));
        }

        let layout = Layout::from_size_align(size.max(1), DEFAULT_ALIGNMENT).map_err(|e| {
            MemForgeError::AllocationFailed {
                kind,
                size,
                reason: e.to_string(),
            }
        })?;
        // SAFETY: layout has non-zero size
        let ptr = NonNull::new(unsafe { alloc::alloc(layout) }).ok_or_else(|| {
            MemForgeError::AllocationFailed {
                kind,
                size,
                reason: "host allocator returned null".to_string(),
            }
        })?;

        let device = match kind {
            MemoryKind::Device => Some(self.current_raw()),
            _ => None,
        };
        self.live.lock()?.insert(
            ptr.as_ptr() as usize,
            Allocation {
                kind,
                device,
                layout,
            },
        );

        let counters = &self.counters[kind_index(kind)];
        counters.allocations.fetch_add(1, Ordering::AcqRel);
        counters.live_bytes.fetch_add(layout.size(), Ordering::AcqRel);
        tracing::trace!(
            "SimulatedRuntime::malloc: {} bytes of {} at {:?}",
            size,
            kind,
            ptr
        );
        Ok(ptr)
    }

    unsafe fn free(&self, kind: MemoryKind, ptr: NonNull<u8>) -> MemResult<()> {
        let addr = ptr.as_ptr() as usize;
        let allocation = {
            let mut live = self.live.lock()?;
            let owned = live.get(&addr).map(|a| a.kind == kind).unwrap_or(false);
            if owned {
                live.remove(&addr)
            } else {
                None
            }
        };
        let allocation = allocation.ok_or(MemForgeError::UnknownAllocation { kind, addr })?;

        alloc::dealloc(ptr.as_ptr(), allocation.layout);

        let counters = &self.counters[kind_index(kind)];
        counters.frees.fetch_add(1, Ordering::AcqRel);
        counters
            .live_bytes
            .fetch_sub(allocation.layout.size(), Ordering::AcqRel);
        tracing::trace!("SimulatedRuntime::free: {} at {:?}", kind, ptr);
        Ok(())
    }

    fn create_event(&self) -> MemResult<RuntimeEvent> {
        let id = self.next_event.fetch_add(1, Ordering::AcqRel);
        self.events.lock()?.insert(id);
        self.events_created.fetch_add(1, Ordering::AcqRel);
        Ok(RuntimeEvent(id))
    }

    unsafe fn destroy_event(&self, event: RuntimeEvent) -> MemResult<()> {
        if self.events.lock()?.remove(&event.0) {
            Ok(())
        } else {
            Err(MemForgeError::RuntimeCall {
                call: "hipEventDestroy",
                code: 400, // hipErrorInvalidHandle
                message: format!("unknown event {}", event.0),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malloc_free_tracks_counters() {
        let runtime = SimulatedRuntime::default();
        let ptr = runtime.malloc(MemoryKind::Pinned, 1000).unwrap();
        assert_eq!(ptr.as_ptr() as usize % DEFAULT_ALIGNMENT, 0);
        assert_eq!(runtime.allocations(MemoryKind::Pinned), 1);
        assert_eq!(runtime.live_bytes(MemoryKind::Pinned), 1000);

        unsafe { runtime.free(MemoryKind::Pinned, ptr).unwrap() };
        assert_eq!(runtime.frees(MemoryKind::Pinned), 1);
        assert_eq!(runtime.live_bytes(MemoryKind::Pinned), 0);
    }

    #[test]
    fn test_free_with_wrong_kind_is_rejected() {
        let runtime = SimulatedRuntime::default();
        let ptr = runtime.malloc(MemoryKind::Managed, 64).unwrap();
        let err = unsafe { runtime.free(MemoryKind::Device, ptr) }.unwrap_err();
        assert!(matches!(err, MemForgeError::UnknownAllocation { .. }));
        unsafe { runtime.free(MemoryKind::Managed, ptr).unwrap() };
    }

    #[test]
    fn test_host_is_not_a_runtime_kind() {
        let runtime = SimulatedRuntime::default();
        assert!(runtime.malloc(MemoryKind::Host, 16).is_err());
    }

    #[test]
    fn test_current_device_is_per_thread() {
        let runtime = std::sync::Arc::new(SimulatedRuntime::builder().devices(2).build());
        runtime.set_device(1).unwrap();
        assert_eq!(runtime.current_device().unwrap(), 1);

        let other = runtime.clone();
        let seen = std::thread::spawn(move || other.current_device().unwrap())
            .join()
            .unwrap();
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_device_allocations_land_on_current_device() {
        let runtime = SimulatedRuntime::builder().devices(2).build();
        runtime.set_device(1).unwrap();
        let ptr = runtime.malloc(MemoryKind::Device, 256).unwrap();
        assert_eq!(runtime.live_device_allocations(1), 1);
        assert_eq!(runtime.live_device_allocations(0), 0);
        unsafe { runtime.free(MemoryKind::Device, ptr).unwrap() };
    }

    #[test]
    fn test_failure_injection() {
        let runtime = SimulatedRuntime::default();
        runtime.set_fail_device_queries(true);
        assert!(runtime.device_count().is_err());
        assert!(runtime.current_device().is_err());
        runtime.set_fail_device_queries(false);
        assert_eq!(runtime.device_count().unwrap(), 1);

        runtime.set_fail_allocations(true);
        assert!(runtime.malloc(MemoryKind::Device, 8).is_err());
    }

    #[test]
    fn test_events_roundtrip() {
        let runtime = SimulatedRuntime::default();
        let event = runtime.create_event().unwrap();
        assert_eq!(runtime.live_events(), 1);
        unsafe { runtime.destroy_event(event).unwrap() };
        assert_eq!(runtime.live_events(), 0);
        assert!(unsafe { runtime.destroy_event(event) }.is_err());
    }

    #[test]
    fn test_zero_devices() {
        let runtime = SimulatedRuntime::builder().devices(0).build();
        assert_eq!(runtime.device_count().unwrap(), 0);
        assert!(matches!(
            runtime.current_device(),
            Err(MemForgeError::DeviceNotFound)
        ));
        assert!(!runtime.supports_virtual_memory(0));
    }
}
