//! Process-wide registry of default allocators
//!
//! One default allocator exists per memory kind, and one per device for
//! device memory. Each is built on first request and then shared. Lookups of
//! a populated slot never take the construction lock; construction of any
//! slot is serialized by a single process-wide lock.
//!
//! Releasing a slot goes through the teardown guard: if the device runtime is
//! unloading, the allocator is leaked instead of destroyed.

pub mod capability;
pub mod defaults;
pub mod factory;
pub mod slot;

pub use capability::CapabilityProbe;
pub use factory::{AllocatorFactory, AllocatorStrategy};
pub use slot::{DeviceTable, Slot};

use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::backend::{default_runtime, DeviceRuntime};
use crate::config::PolicyFlags;
use crate::error::{MemForgeError, MemResult};
use crate::memory::{
    find_pool, release_guarded, MemoryKind, MemoryResource, ResourceHandle, DEFAULT_ALIGNMENT,
};

static GLOBAL_REGISTRY: OnceCell<ResourceRegistry> = OnceCell::new();

/// Default allocators for every memory kind
#[derive(Debug)]
pub struct ResourceRegistry {
    factory: AllocatorFactory,
    construct: Mutex<()>,
    host: Slot,
    pinned: Slot,
    managed: Slot,
    devices: DeviceTable,
}

impl ResourceRegistry {
    /// Registry with fixed policy flags
    pub fn new(runtime: Arc<dyn DeviceRuntime>, flags: PolicyFlags) -> Self {
        let probe = CapabilityProbe::with_flags(Arc::clone(&runtime), flags);
        Self::with_probe(runtime, probe)
    }

    /// Registry over `runtime` reading its policy from the environment
    pub fn from_env(runtime: Arc<dyn DeviceRuntime>) -> Self {
        let probe = CapabilityProbe::from_env(Arc::clone(&runtime));
        Self::with_probe(runtime, probe)
    }

    pub fn with_probe(runtime: Arc<dyn DeviceRuntime>, probe: CapabilityProbe) -> Self {
        Self {
            factory: AllocatorFactory::new(runtime, probe),
            construct: Mutex::new(()),
            host: Slot::new(),
            pinned: Slot::new(),
            managed: Slot::new(),
            devices: DeviceTable::new(),
        }
    }

    /// The process-wide registry, created on first use
    pub fn global() -> &'static ResourceRegistry {
        GLOBAL_REGISTRY.get_or_init(|| {
            let runtime = default_runtime();
            tracing::debug!(
                "ResourceRegistry: creating process-wide registry over {} runtime",
                runtime.name()
            );
            ResourceRegistry::from_env(runtime)
        })
    }

    /// Install `registry` as the process-wide registry
    ///
    /// Fails once the process-wide registry exists, whether installed or
    /// created implicitly by a lookup.
    pub fn install_global(registry: ResourceRegistry) -> MemResult<()> {
        GLOBAL_REGISTRY.set(registry).map_err(|_| {
            MemForgeError::AlreadyInitialized("process-wide resource registry".to_string())
        })
    }

    pub fn factory(&self) -> &AllocatorFactory {
        &self.factory
    }

    pub fn runtime(&self) -> &Arc<dyn DeviceRuntime> {
        self.factory.runtime()
    }

    /// Default allocator for `kind`, building it on first use
    ///
    /// `device` only matters for device memory; `None` means the calling
    /// thread's current device.
    pub fn get_or_create(
        &self,
        kind: MemoryKind,
        device: Option<usize>,
    ) -> MemResult<ResourceHandle> {
        let slot = match kind {
            MemoryKind::Device => return self.get_or_create_device(device),
            MemoryKind::Host => &self.host,
            MemoryKind::Pinned => &self.pinned,
            MemoryKind::Managed => &self.managed,
        };
        if let Some(handle) = slot.get()? {
            return Ok(handle);
        }

        let _lock = self.construct.lock()?;
        if let Some(handle) = slot.get()? {
            return Ok(handle);
        }
        let handle = self.factory.build(kind, None)?;
        slot.publish(Arc::clone(&handle))?;
        tracing::debug!("ResourceRegistry: published default {} allocator", kind);
        Ok(handle)
    }

    /// Default allocator for `device`, building it on first use
    pub fn get_or_create_device(&self, device: Option<usize>) -> MemResult<ResourceHandle> {
        let index = self.resolve_device(device)?;
        let table = self.device_slots()?;
        if let Some(handle) = Self::device_slot(&table, index)?.get()? {
            return Ok(handle);
        }

        let _lock = self.construct.lock()?;
        // The table may have been reset while the lock was contended
        let table = self.device_slots_locked()?;
        let slot = Self::device_slot(&table, index)?;
        if let Some(handle) = slot.get()? {
            return Ok(handle);
        }
        let handle = self.factory.build(MemoryKind::Device, Some(index))?;
        slot.publish(Arc::clone(&handle))?;
        tracing::debug!(
            "ResourceRegistry: published default allocator for device {}",
            index
        );
        Ok(handle)
    }

    /// Replace the default allocator for `kind`
    ///
    /// Handles obtained earlier keep the allocator they were given.
    pub fn set(
        &self,
        kind: MemoryKind,
        device: Option<usize>,
        handle: ResourceHandle,
    ) -> MemResult<()> {
        if handle.kind() != kind {
            return Err(MemForgeError::InvalidArgument(format!(
                "cannot install a {} allocator as the default {} allocator",
                handle.kind(),
                kind
            )));
        }
        let slot = match kind {
            MemoryKind::Device => return self.set_device(device, handle),
            MemoryKind::Host => &self.host,
            MemoryKind::Pinned => &self.pinned,
            MemoryKind::Managed => &self.managed,
        };
        let previous = {
            let _lock = self.construct.lock()?;
            slot.publish(handle)?
        };
        tracing::debug!("ResourceRegistry: default {} allocator replaced", kind);
        self.discard(previous);
        Ok(())
    }

    /// Replace the default allocator for `device`
    pub fn set_device(&self, device: Option<usize>, handle: ResourceHandle) -> MemResult<()> {
        if handle.kind() != MemoryKind::Device {
            return Err(MemForgeError::InvalidArgument(format!(
                "cannot install a {} allocator as a device allocator",
                handle.kind()
            )));
        }
        let index = self.resolve_device(device)?;
        let previous = {
            let _lock = self.construct.lock()?;
            let table = self.device_slots_locked()?;
            Self::device_slot(&table, index)?.publish(handle)?
        };
        tracing::debug!("ResourceRegistry: device {} allocator replaced", index);
        self.discard(previous);
        Ok(())
    }

    /// Clear the slot(s) for `kind`
    ///
    /// For device memory every device slot is cleared; the table keeps its
    /// size.
    pub fn release(&self, kind: MemoryKind) -> MemResult<()> {
        let released: Vec<ResourceHandle> = {
            let _lock = self.construct.lock()?;
            match kind {
                MemoryKind::Host => self.host.take().into_iter().collect(),
                MemoryKind::Pinned => self.pinned.take().into_iter().collect(),
                MemoryKind::Managed => self.managed.take().into_iter().collect(),
                MemoryKind::Device => match self.devices.get()? {
                    Some(table) => Self::take_all(&table),
                    None => Vec::new(),
                },
            }
        };
        for handle in released {
            self.discard(Some(handle));
        }
        Ok(())
    }

    /// Release every slot: pinned, device, managed, then host
    pub fn release_all(&self) -> MemResult<()> {
        for kind in [
            MemoryKind::Pinned,
            MemoryKind::Device,
            MemoryKind::Managed,
            MemoryKind::Host,
        ] {
            self.release(kind)?;
        }
        Ok(())
    }

    /// Return cached memory from every pooled device allocator and the pinned
    /// allocator to its upstream
    ///
    /// Never fails; problems are logged and the slot is skipped. Returns the
    /// number of bytes released.
    pub fn release_unused(&self) -> usize {
        let mut handles = Vec::new();
        match self.devices.get() {
            Ok(Some(table)) => {
                for (index, slot) in table.iter().enumerate() {
                    match slot.get() {
                        Ok(handle) => handles.extend(handle),
                        Err(e) => tracing::warn!(
                            "ResourceRegistry::release_unused: skipping device {}: {}",
                            index,
                            e
                        ),
                    }
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("ResourceRegistry::release_unused: device table: {}", e),
        }
        match self.pinned.get() {
            Ok(handle) => handles.extend(handle),
            Err(e) => tracing::warn!("ResourceRegistry::release_unused: pinned: {}", e),
        }

        let released: usize = handles
            .iter()
            .filter_map(|h| find_pool(&**h))
            .map(|pool| pool.release_unused())
            .sum();
        tracing::debug!("ResourceRegistry::release_unused: {} bytes released", released);
        released
    }

    /// Allocate and immediately free `bytes` through the default allocator
    ///
    /// Pooling allocators keep the block, so later requests up to `bytes` do
    /// not grow the pool.
    pub fn preallocate(
        &self,
        kind: MemoryKind,
        bytes: usize,
        device: Option<usize>,
    ) -> MemResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        let handle = self.get_or_create(kind, device)?;
        let ptr = handle.allocate(bytes, DEFAULT_ALIGNMENT)?;
        // SAFETY: ptr was just allocated from handle with the same size and alignment
        unsafe { handle.deallocate(ptr, bytes, DEFAULT_ALIGNMENT) };
        tracing::debug!("ResourceRegistry: preallocated {} bytes of {}", bytes, kind);
        Ok(())
    }

    /// Drop the device table and its size; the next device lookup sizes it anew
    pub fn reset_device_table(&self) -> MemResult<()> {
        let table = {
            let _lock = self.construct.lock()?;
            self.devices.reset()?
        };
        if let Some(table) = table {
            for handle in Self::take_all(&table) {
                self.discard(Some(handle));
            }
        }
        Ok(())
    }

    /// Number of device slots, once the table is sized
    pub fn device_count(&self) -> Option<usize> {
        self.devices.len()
    }

    /// Number of populated slots
    pub fn constructed(&self) -> usize {
        let fixed = [&self.host, &self.pinned, &self.managed]
            .iter()
            .filter(|s| s.is_populated())
            .count();
        let devices = match self.devices.get() {
            Ok(Some(table)) => table.iter().filter(|s| s.is_populated()).count(),
            _ => 0,
        };
        fixed + devices
    }

    fn resolve_device(&self, device: Option<usize>) -> MemResult<usize> {
        match device {
            Some(index) => Ok(index),
            None => self.runtime().current_device(),
        }
    }

    fn device_slots(&self) -> MemResult<Arc<[Slot]>> {
        if let Some(table) = self.devices.get()? {
            return Ok(table);
        }
        let _lock = self.construct.lock()?;
        self.device_slots_locked()
    }

    /// Current device table, sizing it if needed; the construction lock
    /// must be held
    fn device_slots_locked(&self) -> MemResult<Arc<[Slot]>> {
        if let Some(table) = self.devices.get()? {
            return Ok(table);
        }
        let count = self.runtime().device_count()?;
        self.devices.size_once(count)
    }

    fn take_all(table: &[Slot]) -> Vec<ResourceHandle> {
        table.iter().filter_map(Slot::take).collect()
    }

    fn device_slot(table: &[Slot], index: usize) -> MemResult<&Slot> {
        table.get(index).ok_or(MemForgeError::InvalidDeviceIndex {
            index,
            count: table.len(),
        })
    }

    fn discard(&self, handle: Option<ResourceHandle>) {
        if let Some(handle) = handle {
            release_guarded(handle, &**self.runtime());
        }
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.release_all() {
            tracing::warn!("ResourceRegistry: release on drop failed: {}", e);
        }
    }
}
