//! HIP FFI bindings
//!
//! Only the runtime calls the default resources need: device queries,
//! device/pinned/managed allocation, the last-error query used to detect
//! runtime unload, a virtual address reservation probe, and events.

use std::ffi::{c_char, c_void};

#[link(name = "amdhip64")]
#[allow(dead_code)]
extern "C" {
    pub fn hipInit(flags: u32) -> i32;
    pub fn hipGetDeviceCount(count: *mut i32) -> i32;
    pub fn hipGetDevice(device: *mut i32) -> i32;
    pub fn hipSetDevice(deviceId: i32) -> i32;
    pub fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    pub fn hipFree(ptr: *mut c_void) -> i32;
    pub fn hipHostMalloc(ptr: *mut *mut c_void, size: usize, flags: u32) -> i32;
    pub fn hipHostFree(ptr: *mut c_void) -> i32;
    pub fn hipMallocManaged(ptr: *mut *mut c_void, size: usize, flags: u32) -> i32;
    pub fn hipGetLastError() -> i32;
    pub fn hipGetErrorString(error: i32) -> *const c_char;
    pub fn hipMemAddressReserve(
        ptr: *mut *mut c_void,
        size: usize,
        alignment: usize,
        addr: *mut c_void,
        flags: u64,
    ) -> i32;
    pub fn hipMemAddressFree(devPtr: *mut c_void, size: usize) -> i32;
    pub fn hipEventCreateWithFlags(event: *mut *mut c_void, flags: u32) -> i32;
    pub fn hipEventDestroy(event: *mut c_void) -> i32;
}

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

/// Returned by every call once the runtime has started tearing down
pub const HIP_ERROR_DEINITIALIZED: i32 = 4;

/// Default pinned allocation flags
pub const HIP_HOST_MALLOC_DEFAULT: u32 = 0x0;

/// Managed memory accessible from any stream on any device
pub const HIP_MEM_ATTACH_GLOBAL: u32 = 0x1;

/// Event flag to disable timing data collection
pub const HIP_EVENT_DISABLE_TIMING: u32 = 0x1;
