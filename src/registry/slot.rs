//! Registry slots
//!
//! A slot is read without taking the registry's construction lock, only the
//! slot's own read lock, which also orders the handle with its writer. The
//! `populated` flag lets an empty slot be reported without touching that
//! lock and backs `is_populated`. Writers always hold the registry's
//! construction lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::MemResult;
use crate::memory::ResourceHandle;

/// One default allocator
#[derive(Debug, Default)]
pub struct Slot {
    populated: AtomicBool,
    handle: RwLock<Option<ResourceHandle>>,
}

impl Slot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current handle, if the slot has been populated
    pub fn get(&self) -> MemResult<Option<ResourceHandle>> {
        if !self.populated.load(Ordering::Acquire) {
            return Ok(None);
        }
        Ok(self.handle.read()?.clone())
    }

    pub fn is_populated(&self) -> bool {
        self.populated.load(Ordering::Acquire)
    }

    /// Store `handle`, returning the one it replaces
    pub fn publish(&self, handle: ResourceHandle) -> MemResult<Option<ResourceHandle>> {
        let previous = self.handle.write()?.replace(handle);
        self.populated.store(true, Ordering::Release);
        Ok(previous)
    }

    /// Empty the slot, returning its handle
    ///
    /// A poisoned lock is recovered so the handle can still be released.
    pub fn take(&self) -> Option<ResourceHandle> {
        self.populated.store(false, Ordering::Release);
        self.handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.handle.write();
            panic!("slot poisoned on purpose");
        }));
    }
}

/// One slot per device, sized on first use
///
/// The slot count is the length of the published slice, so the size and the
/// slots become visible together.
#[derive(Debug, Default)]
pub struct DeviceTable {
    slots: RwLock<Option<Arc<[Slot]>>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> MemResult<Option<Arc<[Slot]>>> {
        Ok(self.slots.read()?.clone())
    }

    /// Size the table to `count` devices unless it already is sized
    ///
    /// Must be called with the registry's construction lock held.
    pub fn size_once(&self, count: usize) -> MemResult<Arc<[Slot]>> {
        let mut slots = self.slots.write()?;
        if let Some(existing) = slots.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let table: Arc<[Slot]> = (0..count).map(|_| Slot::new()).collect();
        *slots = Some(Arc::clone(&table));
        tracing::debug!("DeviceTable: sized for {} device(s)", count);
        Ok(table)
    }

    /// Forget the table and its size
    pub fn reset(&self) -> MemResult<Option<Arc<[Slot]>>> {
        Ok(self.slots.write()?.take())
    }

    pub fn len(&self) -> Option<usize> {
        self.slots.read().ok()?.as_ref().map(|s| s.len())
    }
}
