//! Allocator capability interface
//!
//! A [`MemoryResource`] hands out raw blocks of one [`MemoryKind`]. Resources
//! form chains: a pool sits on top of an upstream resource and asks it for
//! larger blocks when its cache runs dry. The chain is walked through the
//! explicit [`MemoryResource::as_pool`] and [`MemoryResource::upstream`]
//! queries rather than by inspecting concrete types.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{MemForgeError, MemResult};
use crate::memory::MemoryKind;

/// Alignment used when the caller has no particular requirement
///
/// Matches the base alignment the HIP runtime guarantees for device blocks.
pub const DEFAULT_ALIGNMENT: usize = 256;

/// Shared-ownership reference to an allocator
///
/// The registry and any number of callers may hold one at the same time; the
/// allocator lives until the last holder lets go.
pub type ResourceHandle = Arc<dyn MemoryResource>;

/// Allocator for one memory kind
pub trait MemoryResource: Send + Sync + fmt::Debug {
    /// Kind of memory this resource hands out
    fn kind(&self) -> MemoryKind;

    /// Allocate `size` bytes aligned to `alignment` (a power of two)
    fn allocate(&self, size: usize, alignment: usize) -> MemResult<NonNull<u8>>;

    /// Return a block to this resource
    ///
    /// # Safety
    ///
    /// `ptr` must come from a previous `allocate` on this same resource with
    /// the same `size` and `alignment`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, alignment: usize);

    /// Pool capability of this stage, if it caches freed blocks
    fn as_pool(&self) -> Option<&dyn PoolCapability> {
        None
    }

    /// Next stage in the chain, if this resource draws from another one
    fn upstream(&self) -> Option<&dyn MemoryResource> {
        None
    }
}

/// Operations offered by resources that cache freed blocks
pub trait PoolCapability: Send + Sync {
    /// Give cached, currently unused blocks back to the upstream
    ///
    /// Returns the number of bytes released.
    fn release_unused(&self) -> usize;

    /// Snapshot of the pool's bookkeeping
    fn stats(&self) -> PoolStats;
}

/// Pool bookkeeping snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Bytes currently obtained from the upstream (in use or cached)
    pub reserved_bytes: usize,
    /// Bytes cached and ready for reuse
    pub free_bytes: usize,
    /// Blocks handed out and not yet returned
    pub live_blocks: usize,
    /// Number of times the pool had to grow through its upstream
    pub upstream_allocations: usize,
}

/// Non-owning adapter around a resource with static lifetime
///
/// Installing one of these as a default never destroys the wrapped resource.
#[derive(Debug, Clone, Copy)]
pub struct UnownedResource {
    inner: &'static dyn MemoryResource,
}

impl UnownedResource {
    pub fn new(inner: &'static dyn MemoryResource) -> Self {
        Self { inner }
    }

    pub fn into_handle(self) -> ResourceHandle {
        Arc::new(self)
    }
}

impl MemoryResource for UnownedResource {
    fn kind(&self) -> MemoryKind {
        self.inner.kind()
    }

    fn allocate(&self, size: usize, alignment: usize) -> MemResult<NonNull<u8>> {
        self.inner.allocate(size, alignment)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        self.inner.deallocate(ptr, size, alignment)
    }

    fn as_pool(&self) -> Option<&dyn PoolCapability> {
        self.inner.as_pool()
    }

    fn upstream(&self) -> Option<&dyn MemoryResource> {
        self.inner.upstream()
    }
}

/// Reject alignments that are zero or not a power of two
pub(crate) fn check_alignment(alignment: usize) -> MemResult<()> {
    if alignment == 0 || !alignment.is_power_of_two() {
        return Err(MemForgeError::InvalidArgument(format!(
            "alignment {} is not a power of two",
            alignment
        )));
    }
    Ok(())
}

/// Round `size` up to a multiple of `granularity` (a power of two)
///
/// Zero-size requests still occupy one granule.
pub(crate) fn round_up(size: usize, granularity: usize) -> MemResult<usize> {
    let size = size.max(1);
    size.checked_add(granularity - 1)
        .map(|s| s & !(granularity - 1))
        .ok_or_else(|| {
            MemForgeError::InvalidArgument(format!(
                "size {} overflows when rounded to {} bytes",
                size, granularity
            ))
        })
}
