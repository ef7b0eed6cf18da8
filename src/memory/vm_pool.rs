//! Growing device pool backed by granularity-sized mappings
//!
//! Used for device memory when pooling is on and the device supports virtual
//! memory mapping. The pool owns its backing chunks directly, so it has no
//! upstream stage and never needs composing.

use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use crate::backend::{DeviceGuard, DeviceRuntime};
use crate::error::{MemForgeError, MemResult};
use crate::memory::free_tree::{Block, FreeTree};
use crate::memory::resource::{check_alignment, round_up};
use crate::memory::{MemoryKind, MemoryResource, PoolCapability, PoolStats, DEFAULT_ALIGNMENT};

#[derive(Debug)]
pub struct VmPoolResource {
    runtime: Arc<dyn DeviceRuntime>,
    device: usize,
    granularity: usize,
    state: Mutex<FreeTree>,
}

impl VmPoolResource {
    pub fn new(runtime: Arc<dyn DeviceRuntime>, device: usize) -> Self {
        let granularity = runtime.vm_granularity().max(DEFAULT_ALIGNMENT).next_power_of_two();
        Self {
            runtime,
            device,
            granularity,
            state: Mutex::new(FreeTree::new()),
        }
    }

    pub fn device_id(&self) -> usize {
        self.device
    }

    /// Size of one mapping; every chunk is a multiple of it
    pub fn granularity(&self) -> usize {
        self.granularity
    }

    fn unmap(&self, block: &Block) {
        if let Some(ptr) = NonNull::new(block.addr as *mut u8) {
            // SAFETY: chunks come from runtime.malloc(Device) in allocate
            if let Err(e) = unsafe { self.runtime.free(MemoryKind::Device, ptr) } {
                tracing::error!(
                    "VmPoolResource: unmapping {} bytes on device {} failed: {}",
                    block.size,
                    self.device,
                    e
                );
            }
        }
    }
}

impl MemoryResource for VmPoolResource {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Device
    }

    fn allocate(&self, size: usize, alignment: usize) -> MemResult<NonNull<u8>> {
        check_alignment(alignment)?;
        if alignment > DEFAULT_ALIGNMENT {
            return Err(MemForgeError::InvalidArgument(format!(
                "mapped device chunks are aligned to {} bytes, {} requested",
                DEFAULT_ALIGNMENT, alignment
            )));
        }
        let chunk = round_up(size, self.granularity)?;

        if let Some(block) = self.state.lock()?.take(chunk, alignment) {
            return NonNull::new(block.addr as *mut u8).ok_or(MemForgeError::UnknownAllocation {
                kind: MemoryKind::Device,
                addr: block.addr,
            });
        }

        let ptr = {
            let _guard = DeviceGuard::new(&*self.runtime, self.device)?;
            self.runtime.malloc(MemoryKind::Device, chunk)?
        };
        self.state.lock()?.insert_new(Block {
            addr: ptr.as_ptr() as usize,
            size: chunk,
            alignment: DEFAULT_ALIGNMENT,
        });
        tracing::debug!(
            "VmPoolResource: mapped {} bytes on device {}",
            chunk,
            self.device
        );
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _size: usize, _alignment: usize) {
        let addr = ptr.as_ptr() as usize;
        match self.state.lock() {
            Ok(mut state) => {
                if state.give_back(addr).is_none() {
                    tracing::error!(
                        "VmPoolResource::deallocate: 0x{:x} is not mapped by device {} pool",
                        addr,
                        self.device
                    );
                }
            }
            Err(e) => tracing::error!("VmPoolResource::deallocate: {}", e),
        }
    }

    fn as_pool(&self) -> Option<&dyn PoolCapability> {
        Some(self)
    }
}

impl PoolCapability for VmPoolResource {
    fn release_unused(&self) -> usize {
        let blocks = match self.state.lock() {
            Ok(mut state) => state.drain_free(),
            Err(e) => {
                tracing::warn!("VmPoolResource::release_unused: {}", e);
                return 0;
            }
        };
        blocks.iter().for_each(|b| self.unmap(b));
        blocks.iter().map(|b| b.size).sum()
    }

    fn stats(&self) -> PoolStats {
        self.state.lock().map(|s| s.stats()).unwrap_or_default()
    }
}

impl Drop for VmPoolResource {
    fn drop(&mut self) {
        let blocks = match self.state.get_mut() {
            Ok(state) => {
                if state.live_blocks() > 0 {
                    tracing::warn!(
                        "VmPoolResource dropped with {} block(s) on device {} still in use",
                        state.live_blocks(),
                        self.device
                    );
                }
                state.drain_all()
            }
            Err(poisoned) => poisoned.into_inner().drain_all(),
        };
        blocks.iter().for_each(|b| self.unmap(b));
    }
}
