//! Plain pass-through allocators
//!
//! No caching: every `allocate` reaches the global allocator (host memory) or
//! the device runtime (pinned, device and managed memory).

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::backend::{DeviceGuard, DeviceRuntime};
use crate::error::{MemForgeError, MemResult};
use crate::memory::resource::check_alignment;
use crate::memory::{MemoryKind, MemoryResource, DEFAULT_ALIGNMENT};

/// Host memory from the global allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct MallocResource;

impl MallocResource {
    pub fn new() -> Self {
        Self
    }

    fn layout(size: usize, alignment: usize) -> MemResult<Layout> {
        Layout::from_size_align(size.max(1), alignment).map_err(|e| {
            MemForgeError::InvalidArgument(format!(
                "bad host layout (size={}, alignment={}): {}",
                size, alignment, e
            ))
        })
    }
}

impl MemoryResource for MallocResource {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Host
    }

    fn allocate(&self, size: usize, alignment: usize) -> MemResult<NonNull<u8>> {
        check_alignment(alignment)?;
        let layout = Self::layout(size, alignment)?;
        // SAFETY: layout has non-zero size
        NonNull::new(unsafe { alloc::alloc(layout) }).ok_or_else(|| {
            MemForgeError::AllocationFailed {
                kind: MemoryKind::Host,
                size,
                reason: "global allocator returned null".to_string(),
            }
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        match Self::layout(size, alignment) {
            Ok(layout) => alloc::dealloc(ptr.as_ptr(), layout),
            Err(e) => tracing::error!("MallocResource::deallocate: {}", e),
        }
    }
}

/// Pinned, device or managed memory straight from the device runtime
#[derive(Debug)]
pub struct RuntimeResource {
    kind: MemoryKind,
    device: Option<usize>,
    runtime: Arc<dyn DeviceRuntime>,
}

impl RuntimeResource {
    /// Page-locked host memory
    pub fn pinned(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            kind: MemoryKind::Pinned,
            device: None,
            runtime,
        }
    }

    /// Memory on `device`
    pub fn device(runtime: Arc<dyn DeviceRuntime>, device: usize) -> Self {
        Self {
            kind: MemoryKind::Device,
            device: Some(device),
            runtime,
        }
    }

    /// Unified managed memory
    pub fn managed(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            kind: MemoryKind::Managed,
            device: None,
            runtime,
        }
    }

    /// Device this resource allocates on (device kind only)
    pub fn device_id(&self) -> Option<usize> {
        self.device
    }
}

impl MemoryResource for RuntimeResource {
    fn kind(&self) -> MemoryKind {
        self.kind
    }

    fn allocate(&self, size: usize, alignment: usize) -> MemResult<NonNull<u8>> {
        check_alignment(alignment)?;
        if alignment > DEFAULT_ALIGNMENT {
            return Err(MemForgeError::InvalidArgument(format!(
                "{} runtime allocations are only aligned to {} bytes, {} requested",
                self.kind, DEFAULT_ALIGNMENT, alignment
            )));
        }

        let _guard = match self.device {
            Some(device) => Some(DeviceGuard::new(&*self.runtime, device)?),
            None => None,
        };
        let ptr = self.runtime.malloc(self.kind, size.max(1))?;
        tracing::trace!(
            "RuntimeResource::allocate: {} bytes of {} at {:?}",
            size,
            self.kind,
            ptr
        );
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _size: usize, _alignment: usize) {
        if let Err(e) = self.runtime.free(self.kind, ptr) {
            tracing::error!(
                "RuntimeResource::deallocate: freeing {} at {:?} failed: {}",
                self.kind,
                ptr,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedRuntime;

    #[test]
    fn test_malloc_resource_alignment() {
        let host = MallocResource::new();
        let ptr = host.allocate(100, 4096).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 4096, 0);
        unsafe { host.deallocate(ptr, 100, 4096) };

        assert!(host.allocate(8, 3).is_err());
    }

    #[test]
    fn test_malloc_resource_zero_size() {
        let host = MallocResource::new();
        let ptr = host.allocate(0, 8).unwrap();
        unsafe { host.deallocate(ptr, 0, 8) };
    }

    #[test]
    fn test_runtime_resource_passes_through() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let pinned = RuntimeResource::pinned(runtime.clone());
        let ptr = pinned.allocate(512, DEFAULT_ALIGNMENT).unwrap();
        assert_eq!(runtime.allocations(MemoryKind::Pinned), 1);
        unsafe { pinned.deallocate(ptr, 512, DEFAULT_ALIGNMENT) };
        assert_eq!(runtime.frees(MemoryKind::Pinned), 1);
        assert!(pinned.as_pool().is_none());
        assert!(pinned.upstream().is_none());
    }

    #[test]
    fn test_device_resource_allocates_on_its_device() {
        let runtime = Arc::new(SimulatedRuntime::builder().devices(2).build());
        runtime.set_device(0).unwrap();
        let dev1 = RuntimeResource::device(runtime.clone(), 1);

        let ptr = dev1.allocate(1024, 256).unwrap();
        assert_eq!(runtime.live_device_allocations(1), 1);
        assert_eq!(runtime.current_device().unwrap(), 0);
        unsafe { dev1.deallocate(ptr, 1024, 256) };
    }

    #[test]
    fn test_runtime_resource_rejects_large_alignment() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let managed = RuntimeResource::managed(runtime);
        assert!(matches!(
            managed.allocate(64, 4096),
            Err(MemForgeError::InvalidArgument(_))
        ));
    }
}
