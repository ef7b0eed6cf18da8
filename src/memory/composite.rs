//! Pool bound to the upstream resources it draws from
//!
//! A pool returns its outstanding blocks to the upstream when it is destroyed,
//! so the upstream has to outlive it. [`CompositeResource`] owns both and
//! drops the pool first. Under the teardown guard neither is dropped.

use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::backend::DeviceRuntime;
use crate::error::MemResult;
use crate::memory::{LeakPolicy, MemoryKind, MemoryResource, PoolCapability, ResourceHandle};

/// Pool plus the upstream handles it depends on
pub struct CompositeResource<P: MemoryResource> {
    pool: ManuallyDrop<P>,
    upstreams: ManuallyDrop<Vec<ResourceHandle>>,
    runtime: Arc<dyn DeviceRuntime>,
}

impl<P: MemoryResource> CompositeResource<P> {
    pub fn new(pool: P, upstreams: Vec<ResourceHandle>, runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            pool: ManuallyDrop::new(pool),
            upstreams: ManuallyDrop::new(upstreams),
            runtime,
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn upstreams(&self) -> &[ResourceHandle] {
        &self.upstreams
    }

    /// Give up the pool and its upstreams without destroying them
    pub fn abandon(self) {
        tracing::warn!(
            "CompositeResource: abandoning {} pool and {} upstream(s)",
            self.pool.kind(),
            self.upstreams.len()
        );
        let _ = ManuallyDrop::new(self);
    }
}

impl<P: MemoryResource> std::fmt::Debug for CompositeResource<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeResource")
            .field("pool", &*self.pool)
            .field("upstreams", &self.upstreams.len())
            .finish()
    }
}

impl<P: MemoryResource> MemoryResource for CompositeResource<P> {
    fn kind(&self) -> MemoryKind {
        self.pool.kind()
    }

    fn allocate(&self, size: usize, alignment: usize) -> MemResult<NonNull<u8>> {
        self.pool.allocate(size, alignment)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        self.pool.deallocate(ptr, size, alignment)
    }

    fn as_pool(&self) -> Option<&dyn PoolCapability> {
        self.pool.as_pool()
    }

    fn upstream(&self) -> Option<&dyn MemoryResource> {
        self.pool.upstream()
    }
}

impl<P: MemoryResource> Drop for CompositeResource<P> {
    fn drop(&mut self) {
        match LeakPolicy::for_runtime(&*self.runtime) {
            LeakPolicy::RunDestructor => {
                // SAFETY: both fields are dropped exactly once, here, pool first
                unsafe {
                    ManuallyDrop::drop(&mut self.pool);
                    ManuallyDrop::drop(&mut self.upstreams);
                }
            }
            LeakPolicy::Detach => {
                tracing::warn!(
                    "CompositeResource: {} runtime is unloading, leaking {} pool",
                    self.runtime.name(),
                    self.pool.kind()
                );
            }
        }
    }
}

/// Bind `pool` to `upstreams` and erase the type into a shared handle
pub fn compose<P>(
    pool: P,
    upstreams: Vec<ResourceHandle>,
    runtime: Arc<dyn DeviceRuntime>,
) -> ResourceHandle
where
    P: MemoryResource + 'static,
{
    Arc::new(CompositeResource::new(pool, upstreams, runtime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedRuntime;
    use crate::memory::{find_pool, PoolResource, RuntimeResource};

    fn composite(runtime: &Arc<SimulatedRuntime>) -> CompositeResource<PoolResource> {
        let upstream: ResourceHandle = Arc::new(RuntimeResource::pinned(runtime.clone()));
        let pool = PoolResource::new(upstream.clone());
        CompositeResource::new(pool, vec![upstream], runtime.clone())
    }

    #[test]
    fn test_delegates_to_pool() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let res = composite(&runtime);
        let ptr = res.allocate(300, 256).unwrap();
        unsafe { res.deallocate(ptr, 300, 256) };

        assert_eq!(res.kind(), MemoryKind::Pinned);
        assert_eq!(res.pool().stats().free_bytes, 512);
        assert!(find_pool(&res).is_some());
        assert_eq!(res.upstreams().len(), 1);
    }

    #[test]
    fn test_pool_returns_blocks_before_upstream_goes() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let res = composite(&runtime);
        let _outstanding = res.allocate(4096, 256).unwrap();

        drop(res);
        assert_eq!(runtime.frees(MemoryKind::Pinned), 1);
        assert_eq!(runtime.live_bytes(MemoryKind::Pinned), 0);
    }

    #[test]
    fn test_unloading_leaks_the_chain() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let res = composite(&runtime);
        let _outstanding = res.allocate(4096, 256).unwrap();

        runtime.set_unloading(true);
        drop(res);
        assert_eq!(runtime.frees(MemoryKind::Pinned), 0);
    }

    #[test]
    fn test_abandon() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let res = composite(&runtime);
        let _ptr = res.allocate(64, 64).unwrap();
        res.abandon();
        assert_eq!(runtime.frees(MemoryKind::Pinned), 0);
        assert_eq!(runtime.live_bytes(MemoryKind::Pinned), 256);
    }

    #[test]
    fn test_compose_erases_type() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let upstream: ResourceHandle = Arc::new(RuntimeResource::pinned(runtime.clone()));
        let handle = compose(PoolResource::new(upstream.clone()), vec![upstream], runtime.clone());
        assert_eq!(handle.kind(), MemoryKind::Pinned);
        assert!(handle.as_pool().is_some());
    }
}
