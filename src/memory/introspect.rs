//! Pool discovery along a resource chain

use crate::memory::{MemoryResource, PoolCapability};

/// First stage of the chain starting at `resource` that caches freed blocks
///
/// Returns `None` when no stage is a pool, for example when pooling is
/// disabled and the chain is a single pass-through allocator.
pub fn find_pool(resource: &dyn MemoryResource) -> Option<&dyn PoolCapability> {
    let mut stage = resource;
    loop {
        if let Some(pool) = stage.as_pool() {
            return Some(pool);
        }
        stage = stage.upstream()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemResult;
    use crate::memory::{MallocResource, MemoryKind, PoolResource, ResourceHandle};
    use std::ptr::NonNull;
    use std::sync::Arc;

    /// Pass-through stage in front of another resource
    #[derive(Debug)]
    struct Adaptor(ResourceHandle);

    impl MemoryResource for Adaptor {
        fn kind(&self) -> MemoryKind {
            self.0.kind()
        }
        fn allocate(&self, size: usize, alignment: usize) -> MemResult<NonNull<u8>> {
            self.0.allocate(size, alignment)
        }
        unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, alignment: usize) {
            self.0.deallocate(ptr, size, alignment)
        }
        fn upstream(&self) -> Option<&dyn MemoryResource> {
            Some(&*self.0)
        }
    }

    #[test]
    fn test_plain_resource_has_no_pool() {
        assert!(find_pool(&MallocResource::new()).is_none());
    }

    #[test]
    fn test_walks_through_adaptors() {
        let pool: ResourceHandle = Arc::new(PoolResource::new(Arc::new(MallocResource::new())));
        let outer = Adaptor(Arc::new(Adaptor(pool)));
        assert!(find_pool(&outer).is_some());
    }

    #[test]
    fn test_adaptor_over_plain_has_no_pool() {
        let outer = Adaptor(Arc::new(MallocResource::new()));
        assert!(find_pool(&outer).is_none());
    }
}
