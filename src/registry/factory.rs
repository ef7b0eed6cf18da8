//! Construction of the default allocator for each memory kind
//!
//! | Kind | Policy | Strategy |
//! |---|---|---|
//! | host | always | plain |
//! | managed | always | plain |
//! | pinned | pool off | plain |
//! | pinned | pool on | tree pool over plain pinned |
//! | device | pool off | plain |
//! | device | pool on, vmm on and supported | mapped pool |
//! | device | pool on otherwise | tree pool over plain device |

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::backend::{DeviceGuard, DeviceRuntime, EventPool};
use crate::config::PolicyFlags;
use crate::error::MemResult;
use crate::memory::{
    compose, MallocResource, MemoryKind, PoolResource, ResourceHandle, RuntimeResource,
    VmPoolResource,
};
use crate::registry::CapabilityProbe;

/// How the default allocator for a kind is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorStrategy {
    /// Pass-through to the global allocator or the runtime
    Plain,
    /// Best-fit pool over a plain upstream, composed with it
    TreePool,
    /// Self-contained pool growing through mapped chunks
    VmPool,
}

impl fmt::Display for AllocatorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocatorStrategy::Plain => write!(f, "plain"),
            AllocatorStrategy::TreePool => write!(f, "tree_pool"),
            AllocatorStrategy::VmPool => write!(f, "vm_pool"),
        }
    }
}

/// Builds default allocators
///
/// Plain leaf allocators for host, managed and pinned memory are created once
/// per factory and shared by every allocator it builds.
#[derive(Debug)]
pub struct AllocatorFactory {
    runtime: Arc<dyn DeviceRuntime>,
    probe: CapabilityProbe,
    runtime_ready: OnceCell<()>,
    event_pool: OnceCell<Arc<EventPool>>,
    host: OnceCell<ResourceHandle>,
    managed: OnceCell<ResourceHandle>,
    pinned_upstream: OnceCell<ResourceHandle>,
    builds: AtomicUsize,
}

impl AllocatorFactory {
    pub fn new(runtime: Arc<dyn DeviceRuntime>, probe: CapabilityProbe) -> Self {
        Self {
            runtime,
            probe,
            runtime_ready: OnceCell::new(),
            event_pool: OnceCell::new(),
            host: OnceCell::new(),
            managed: OnceCell::new(),
            pinned_upstream: OnceCell::new(),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn DeviceRuntime> {
        &self.runtime
    }

    pub fn flags(&self) -> PolicyFlags {
        self.probe.flags()
    }

    /// Event pool, once a device or pinned allocator has been built
    pub fn event_pool(&self) -> Option<&Arc<EventPool>> {
        self.event_pool.get()
    }

    /// Number of allocators built so far
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Acquire)
    }

    /// Strategy `build` would pick for `kind` on the calling thread's current device
    pub fn strategy_for(&self, kind: MemoryKind) -> AllocatorStrategy {
        let flags = self.probe.flags();
        match kind {
            MemoryKind::Host | MemoryKind::Managed => AllocatorStrategy::Plain,
            MemoryKind::Pinned if flags.pinned_pool => AllocatorStrategy::TreePool,
            MemoryKind::Pinned => AllocatorStrategy::Plain,
            MemoryKind::Device if !flags.device_pool => AllocatorStrategy::Plain,
            MemoryKind::Device => {
                let device = self.runtime.current_device().unwrap_or(0);
                if flags.vmm && self.probe.supports_vmm(device) {
                    AllocatorStrategy::VmPool
                } else {
                    AllocatorStrategy::TreePool
                }
            }
        }
    }

    /// Build the default allocator for `kind`
    ///
    /// `device` selects the device for device memory (`None`: the calling
    /// thread's current device) and is ignored for other kinds.
    pub fn build(&self, kind: MemoryKind, device: Option<usize>) -> MemResult<ResourceHandle> {
        let handle = match kind {
            MemoryKind::Host => self.host_leaf(),
            MemoryKind::Managed => {
                self.ensure_runtime()?;
                self.managed_leaf()
            }
            MemoryKind::Pinned => {
                self.ensure_runtime()?;
                self.ensure_event_pool();
                self.build_pinned()?
            }
            MemoryKind::Device => {
                let device = match device {
                    Some(device) => device,
                    None => self.runtime.current_device()?,
                };
                let _guard = DeviceGuard::new(&*self.runtime, device)?;
                self.ensure_runtime()?;
                self.ensure_event_pool();
                self.build_device(device)?
            }
        };
        self.builds.fetch_add(1, Ordering::AcqRel);
        Ok(handle)
    }

    fn build_pinned(&self) -> MemResult<ResourceHandle> {
        let upstream = self.pinned_leaf();
        let strategy = self.strategy_for(MemoryKind::Pinned);
        tracing::debug!("AllocatorFactory: building pinned allocator ({})", strategy);
        Ok(match strategy {
            AllocatorStrategy::TreePool => compose(
                PoolResource::new(Arc::clone(&upstream)),
                vec![upstream],
                Arc::clone(&self.runtime),
            ),
            _ => upstream,
        })
    }

    fn build_device(&self, device: usize) -> MemResult<ResourceHandle> {
        let strategy = self.strategy_for(MemoryKind::Device);
        tracing::debug!(
            "AllocatorFactory: building device {} allocator ({})",
            device,
            strategy
        );
        let runtime = Arc::clone(&self.runtime);
        Ok(match strategy {
            AllocatorStrategy::Plain => Arc::new(RuntimeResource::device(runtime, device)),
            AllocatorStrategy::VmPool => Arc::new(VmPoolResource::new(runtime, device)),
            AllocatorStrategy::TreePool => {
                let upstream: ResourceHandle =
                    Arc::new(RuntimeResource::device(Arc::clone(&runtime), device));
                compose(
                    PoolResource::new(Arc::clone(&upstream)),
                    vec![upstream],
                    runtime,
                )
            }
        })
    }

    /// Initialize the runtime once, on the calling thread's current device
    fn ensure_runtime(&self) -> MemResult<()> {
        self.runtime_ready
            .get_or_try_init(|| {
                let device = self.runtime.current_device()?;
                let _guard = DeviceGuard::new(&*self.runtime, device)?;
                self.runtime.init()?;
                tracing::debug!(
                    "AllocatorFactory: {} runtime initialized on device {}",
                    self.runtime.name(),
                    device
                );
                Ok(())
            })
            .map(|_| ())
    }

    fn ensure_event_pool(&self) {
        self.event_pool
            .get_or_init(|| Arc::new(EventPool::new(Arc::clone(&self.runtime))));
    }

    fn host_leaf(&self) -> ResourceHandle {
        Arc::clone(
            self.host
                .get_or_init(|| Arc::new(MallocResource::new()) as ResourceHandle),
        )
    }

    fn managed_leaf(&self) -> ResourceHandle {
        Arc::clone(self.managed.get_or_init(|| {
            Arc::new(RuntimeResource::managed(Arc::clone(&self.runtime))) as ResourceHandle
        }))
    }

    fn pinned_leaf(&self) -> ResourceHandle {
        Arc::clone(self.pinned_upstream.get_or_init(|| {
            Arc::new(RuntimeResource::pinned(Arc::clone(&self.runtime))) as ResourceHandle
        }))
    }
}
