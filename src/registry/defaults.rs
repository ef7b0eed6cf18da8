//! Free functions over the process-wide registry
//!
//! ```no_run
//! use memforge::memory::{MemoryKind, DEFAULT_ALIGNMENT};
//! use memforge::registry::defaults;
//!
//! # fn main() -> memforge::MemResult<()> {
//! defaults::preallocate_pinned_memory(64 << 20)?;
//! let pinned = defaults::share_default(MemoryKind::Pinned, None)?;
//! let block = pinned.allocate(1 << 20, DEFAULT_ALIGNMENT)?;
//! unsafe { pinned.deallocate(block, 1 << 20, DEFAULT_ALIGNMENT) };
//! defaults::release_unused_memory();
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Weak};

use crate::error::MemResult;
use crate::memory::{MemoryKind, MemoryResource, ResourceHandle, UnownedResource};
use crate::registry::ResourceRegistry;

/// Allocator handed to [`set_default_raw`]
#[derive(Debug)]
pub enum RawResource {
    /// The registry takes ownership and destroys the allocator with its slot
    Owned(Box<dyn MemoryResource>),
    /// The registry only borrows the allocator
    Unowned(&'static dyn MemoryResource),
}

impl RawResource {
    pub fn into_handle(self) -> ResourceHandle {
        match self {
            RawResource::Owned(resource) => Arc::from(resource),
            RawResource::Unowned(resource) => UnownedResource::new(resource).into_handle(),
        }
    }
}

/// Default allocator for `kind`, shared with the registry
pub fn share_default(kind: MemoryKind, device: Option<usize>) -> MemResult<ResourceHandle> {
    ResourceRegistry::global().get_or_create(kind, device)
}

/// Non-owning view of the default allocator for `kind`
///
/// The view stops upgrading once the registry lets go of the allocator and
/// no other handle keeps it alive.
pub fn get_default(kind: MemoryKind, device: Option<usize>) -> MemResult<Weak<dyn MemoryResource>> {
    Ok(Arc::downgrade(&share_default(kind, device)?))
}

pub fn set_default(kind: MemoryKind, device: Option<usize>, handle: ResourceHandle) -> MemResult<()> {
    ResourceRegistry::global().set(kind, device, handle)
}

pub fn set_default_raw(kind: MemoryKind, device: Option<usize>, resource: RawResource) -> MemResult<()> {
    set_default(kind, device, resource.into_handle())
}

/// Trim every pooled device allocator and the pinned allocator
pub fn release_unused_memory() -> usize {
    ResourceRegistry::global().release_unused()
}

pub fn preallocate(kind: MemoryKind, bytes: usize, device: Option<usize>) -> MemResult<()> {
    ResourceRegistry::global().preallocate(kind, bytes, device)
}

pub fn preallocate_device_memory(bytes: usize, device: Option<usize>) -> MemResult<()> {
    preallocate(MemoryKind::Device, bytes, device)
}

pub fn preallocate_pinned_memory(bytes: usize) -> MemResult<()> {
    preallocate(MemoryKind::Pinned, bytes, None)
}

/// Release every default allocator, leaking them if the runtime is unloading
///
/// Statics are never dropped, so programs that want their default allocators
/// destroyed call this before exit.
pub fn shutdown() -> MemResult<()> {
    tracing::debug!("defaults::shutdown");
    ResourceRegistry::global().release_all()
}

/// Forget the device table so the next device lookup re-queries the device count
#[doc(hidden)]
pub fn test_free_device_resources() -> MemResult<()> {
    ResourceRegistry::global().reset_device_table()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MallocResource;

    static STATIC_HOST: MallocResource = MallocResource;

    #[test]
    fn test_owned_raw_resource() {
        let handle = RawResource::Owned(Box::new(MallocResource::new())).into_handle();
        assert_eq!(handle.kind(), MemoryKind::Host);
        assert_eq!(Arc::strong_count(&handle), 1);
    }

    #[test]
    fn test_unowned_raw_resource() {
        let handle = RawResource::Unowned(&STATIC_HOST).into_handle();
        let ptr = handle.allocate(16, 16).unwrap();
        unsafe { handle.deallocate(ptr, 16, 16) };
        drop(handle);
        // The static is untouched by dropping the handle
        assert_eq!(STATIC_HOST.kind(), MemoryKind::Host);
    }
}
