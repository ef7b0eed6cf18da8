//! HIP implementation of the device runtime seam

use std::ffi::{c_void, CStr};
use std::ptr::{self, NonNull};

use once_cell::sync::OnceCell;

use crate::backend::hip_backend::ffi;
use crate::backend::{DeviceGuard, DeviceRuntime, RuntimeEvent};
use crate::error::{MemForgeError, MemResult};
use crate::memory::MemoryKind;

/// Human-readable message for a HIP error code
pub fn get_error_string(code: i32) -> String {
    // SAFETY: hipGetErrorString returns a pointer to a static string (or null)
    unsafe {
        let msg = ffi::hipGetErrorString(code);
        if msg.is_null() {
            return format!("unknown HIP error {}", code);
        }
        CStr::from_ptr(msg).to_string_lossy().into_owned()
    }
}

fn check(call: &'static str, code: i32) -> MemResult<()> {
    if code == ffi::HIP_SUCCESS {
        Ok(())
    } else {
        Err(MemForgeError::RuntimeCall {
            call,
            code,
            message: get_error_string(code),
        })
    }
}

/// Device runtime backed by `amdhip64`
#[derive(Debug, Default)]
pub struct HipRuntime {
    initialized: OnceCell<()>,
}

impl HipRuntime {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceRuntime for HipRuntime {
    fn name(&self) -> &str {
        "hip"
    }

    fn init(&self) -> MemResult<()> {
        self.initialized
            .get_or_try_init(|| {
                tracing::debug!("HipRuntime::init: calling hipInit(0)");
                check("hipInit", unsafe { ffi::hipInit(0) })
            })
            .map(|_| ())
    }

    fn device_count(&self) -> MemResult<usize> {
        let mut count: i32 = 0;
        check("hipGetDeviceCount", unsafe {
            ffi::hipGetDeviceCount(&mut count)
        })?;
        Ok(count.max(0) as usize)
    }

    fn current_device(&self) -> MemResult<usize> {
        let mut device: i32 = -1;
        check("hipGetDevice", unsafe { ffi::hipGetDevice(&mut device) })?;
        if device < 0 {
            return Err(MemForgeError::DeviceNotFound);
        }
        Ok(device as usize)
    }

    fn set_device(&self, device: usize) -> MemResult<()> {
        let id = i32::try_from(device).map_err(|_| {
            MemForgeError::InvalidArgument(format!("device ordinal {} out of range", device))
        })?;
        check("hipSetDevice", unsafe { ffi::hipSetDevice(id) })
    }

    fn is_unloading(&self) -> bool {
        // Once teardown has begun every call, this one included, reports
        // the deinitialized error.
        unsafe { ffi::hipGetLastError() == ffi::HIP_ERROR_DEINITIALIZED }
    }

    fn supports_virtual_memory(&self, device: usize) -> bool {
        let Ok(_guard) = DeviceGuard::new(self, device) else {
            return false;
        };
        let size = self.vm_granularity();
        let mut ptr: *mut c_void = ptr::null_mut();
        let reserved = unsafe { ffi::hipMemAddressReserve(&mut ptr, size, 0, ptr::null_mut(), 0) };
        if reserved != ffi::HIP_SUCCESS || ptr.is_null() {
            tracing::debug!(
                "HipRuntime: virtual memory not supported on device {} ({})",
                device,
                get_error_string(reserved)
            );
            // Clear the sticky error left by the failed probe
            unsafe { ffi::hipGetLastError() };
            return false;
        }
        unsafe { ffi::hipMemAddressFree(ptr, size) };
        true
    }

    fn malloc(&self, kind: MemoryKind, size: usize) -> MemResult<NonNull<u8>> {
        let mut ptr: *mut c_void = ptr::null_mut();
        let (call, code) = match kind {
            MemoryKind::Device => ("hipMalloc", unsafe { ffi::hipMalloc(&mut ptr, size) }),
            MemoryKind::Pinned => ("hipHostMalloc", unsafe {
                ffi::hipHostMalloc(&mut ptr, size, ffi::HIP_HOST_MALLOC_DEFAULT)
            }),
            MemoryKind::Managed => ("hipMallocManaged", unsafe {
                ffi::hipMallocManaged(&mut ptr, size, ffi::HIP_MEM_ATTACH_GLOBAL)
            }),
            MemoryKind::Host => {
                return Err(MemForgeError::InvalidArgument(
                    "host memory is not allocated through the device runtime".to_string(),
                ))
            }
        };

        if code != ffi::HIP_SUCCESS {
            tracing::error!("{} failed with code {} for {} bytes", call, code, size);
            return Err(MemForgeError::AllocationFailed {
                kind,
                size,
                reason: format!("{} returned {} ({})", call, code, get_error_string(code)),
            });
        }

        NonNull::new(ptr as *mut u8).ok_or_else(|| MemForgeError::AllocationFailed {
            kind,
            size,
            reason: format!("{} returned a null pointer", call),
        })
    }

    unsafe fn free(&self, kind: MemoryKind, ptr: NonNull<u8>) -> MemResult<()> {
        let raw = ptr.as_ptr() as *mut c_void;
        match kind {
            MemoryKind::Device | MemoryKind::Managed => check("hipFree", ffi::hipFree(raw)),
            MemoryKind::Pinned => check("hipHostFree", ffi::hipHostFree(raw)),
            MemoryKind::Host => Err(MemForgeError::UnknownAllocation {
                kind,
                addr: raw as usize,
            }),
        }
    }

    fn create_event(&self) -> MemResult<RuntimeEvent> {
        let mut event: *mut c_void = ptr::null_mut();
        check("hipEventCreateWithFlags", unsafe {
            ffi::hipEventCreateWithFlags(&mut event, ffi::HIP_EVENT_DISABLE_TIMING)
        })?;
        if event.is_null() {
            return Err(MemForgeError::RuntimeCall {
                call: "hipEventCreateWithFlags",
                code: ffi::HIP_SUCCESS,
                message: "returned null event".to_string(),
            });
        }
        Ok(RuntimeEvent(event as usize))
    }

    unsafe fn destroy_event(&self, event: RuntimeEvent) -> MemResult<()> {
        check("hipEventDestroy", ffi::hipEventDestroy(event.0 as *mut c_void))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    #[ignore = "requires an AMD GPU"]
    fn test_hip_runtime_device_roundtrip() {
        let runtime = HipRuntime::new();
        runtime.init().unwrap();
        assert!(runtime.device_count().unwrap() > 0);

        let ptr = runtime.malloc(MemoryKind::Device, 4096).unwrap();
        unsafe { runtime.free(MemoryKind::Device, ptr).unwrap() };
        assert!(!runtime.is_unloading());
    }
}
