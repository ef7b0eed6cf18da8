//! Caching pool over an upstream resource
//!
//! Freed blocks stay in the pool's free tree and are reused by later requests
//! instead of going back to the upstream. [`PoolCapability::release_unused`]
//! returns the cached blocks; dropping the pool returns everything, including
//! blocks still handed out.

use std::ptr::NonNull;
use std::sync::Mutex;

use crate::error::{MemForgeError, MemResult};
use crate::memory::free_tree::{Block, FreeTree};
use crate::memory::resource::{check_alignment, round_up};
use crate::memory::{
    MemoryKind, MemoryResource, PoolCapability, PoolStats, ResourceHandle, DEFAULT_ALIGNMENT,
};

/// Best-fit free-tree pool
#[derive(Debug)]
pub struct PoolResource {
    upstream: ResourceHandle,
    granularity: usize,
    state: Mutex<FreeTree>,
}

impl PoolResource {
    /// Pool drawing blocks from `upstream`
    pub fn new(upstream: ResourceHandle) -> Self {
        Self::with_granularity(upstream, DEFAULT_ALIGNMENT)
    }

    /// Pool whose block sizes are multiples of `granularity` (a power of two)
    pub fn with_granularity(upstream: ResourceHandle, granularity: usize) -> Self {
        let granularity = granularity.max(1).next_power_of_two();
        Self {
            upstream,
            granularity,
            state: Mutex::new(FreeTree::new()),
        }
    }
}

impl MemoryResource for PoolResource {
    fn kind(&self) -> MemoryKind {
        self.upstream.kind()
    }

    fn allocate(&self, size: usize, alignment: usize) -> MemResult<NonNull<u8>> {
        check_alignment(alignment)?;
        let block_size = round_up(size, self.granularity)?;

        if let Some(block) = self.state.lock()?.take(block_size, alignment) {
            tracing::trace!(
                "PoolResource::allocate: reused {} byte block for {} bytes",
                block.size,
                size
            );
            return NonNull::new(block.addr as *mut u8)
                .ok_or_else(|| MemForgeError::UnknownAllocation {
                    kind: self.kind(),
                    addr: block.addr,
                });
        }

        let upstream_alignment = alignment.max(self.granularity.min(DEFAULT_ALIGNMENT));
        let ptr = self.upstream.allocate(block_size, upstream_alignment)?;
        self.state.lock()?.insert_new(Block {
            addr: ptr.as_ptr() as usize,
            size: block_size,
            alignment: upstream_alignment,
        });
        tracing::trace!(
            "PoolResource::allocate: grew by {} bytes for {} bytes",
            block_size,
            size
        );
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _size: usize, _alignment: usize) {
        let addr = ptr.as_ptr() as usize;
        match self.state.lock() {
            Ok(mut state) => {
                if state.give_back(addr).is_none() {
                    tracing::error!(
                        "PoolResource::deallocate: {} block at 0x{:x} was not allocated here",
                        self.kind(),
                        addr
                    );
                }
            }
            Err(e) => tracing::error!("PoolResource::deallocate: {}", e),
        }
    }

    fn as_pool(&self) -> Option<&dyn PoolCapability> {
        Some(self)
    }

    fn upstream(&self) -> Option<&dyn MemoryResource> {
        Some(&*self.upstream)
    }
}

impl PoolCapability for PoolResource {
    fn release_unused(&self) -> usize {
        let blocks = match self.state.lock() {
            Ok(mut state) => state.drain_free(),
            Err(e) => {
                tracing::warn!("PoolResource::release_unused: {}", e);
                return 0;
            }
        };
        let mut released = 0;
        for block in blocks {
            if let Some(ptr) = NonNull::new(block.addr as *mut u8) {
                // SAFETY: the block came from upstream.allocate with this size/alignment
                unsafe { self.upstream.deallocate(ptr, block.size, block.alignment) };
                released += block.size;
            }
        }
        tracing::debug!(
            "PoolResource::release_unused: returned {} bytes of {}",
            released,
            self.kind()
        );
        released
    }

    fn stats(&self) -> PoolStats {
        self.state
            .lock()
            .map(|s| s.stats())
            .unwrap_or_default()
    }
}

impl Drop for PoolResource {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let outstanding = state.live_blocks();
        if outstanding > 0 {
            tracing::warn!(
                "PoolResource dropped with {} {} block(s) still in use",
                outstanding,
                self.upstream.kind()
            );
        }
        for block in state.drain_all() {
            if let Some(ptr) = NonNull::new(block.addr as *mut u8) {
                // SAFETY: the block came from upstream.allocate with this size/alignment
                unsafe { self.upstream.deallocate(ptr, block.size, block.alignment) };
            }
        }
    }
}
