//! Scoped switch of the calling thread's current device
//!
//! Device context is PER-THREAD: `set_device` only affects the calling thread.
//! Resources for device `d` must be created while `d` is current, so the
//! registry wraps construction in a [`DeviceGuard`].

use crate::backend::DeviceRuntime;
use crate::error::MemResult;

/// Makes a device current and restores the previous one on drop
#[derive(Debug)]
pub struct DeviceGuard<'a> {
    runtime: &'a dyn DeviceRuntime,
    previous: usize,
    switched: bool,
}

impl<'a> DeviceGuard<'a> {
    /// Make `device` current for the calling thread
    pub fn new(runtime: &'a dyn DeviceRuntime, device: usize) -> MemResult<Self> {
        let previous = runtime.current_device()?;
        let switched = previous != device;
        if switched {
            tracing::trace!("DeviceGuard: switching device {} -> {}", previous, device);
            runtime.set_device(device)?;
        }
        Ok(Self {
            runtime,
            previous,
            switched,
        })
    }

    /// Device that was current before the guard was created
    pub fn previous(&self) -> usize {
        self.previous
    }
}

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        if self.switched {
            if let Err(e) = self.runtime.set_device(self.previous) {
                tracing::error!(
                    "DeviceGuard: failed to restore device {}: {}",
                    self.previous,
                    e
                );
            }
        }
    }
}
