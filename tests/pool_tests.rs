//! Preallocation and reuse through the pooled default allocators

mod common;

use common::{registry, runtime, runtime_without_vmm, GRANULE};
use memforge::memory::{find_pool, MemoryKind, DEFAULT_ALIGNMENT};
use memforge::{MemoryResource, PolicyFlags};
use proptest::prelude::*;

#[test]
fn test_preallocated_pinned_memory_is_reused() {
    let rt = runtime(1);
    let registry = registry(&rt, PolicyFlags::new());
    registry.preallocate(MemoryKind::Pinned, 1 << 20, None).unwrap();
    let grown = rt.allocations(MemoryKind::Pinned);

    let pinned = registry.get_or_create(MemoryKind::Pinned, None).unwrap();
    let ptr = pinned.allocate(512 * 1024, DEFAULT_ALIGNMENT).unwrap();
    assert_eq!(rt.allocations(MemoryKind::Pinned), grown);
    unsafe { pinned.deallocate(ptr, 512 * 1024, DEFAULT_ALIGNMENT) };
}

#[test]
fn test_preallocated_device_memory_is_reused() {
    for rt in [runtime(1), runtime_without_vmm(1)] {
        let registry = registry(&rt, PolicyFlags::new());
        registry.preallocate(MemoryKind::Device, 3 * GRANULE, Some(0)).unwrap();
        let grown = rt.allocations(MemoryKind::Device);

        let device = registry.get_or_create_device(Some(0)).unwrap();
        let ptr = device.allocate(2 * GRANULE, DEFAULT_ALIGNMENT).unwrap();
        assert_eq!(rt.allocations(MemoryKind::Device), grown);
        unsafe { device.deallocate(ptr, 2 * GRANULE, DEFAULT_ALIGNMENT) };
    }
}

#[test]
fn test_plain_allocator_grows_every_time() {
    let rt = runtime(1);
    let registry = registry(&rt, PolicyFlags::disabled());
    registry.preallocate(MemoryKind::Pinned, 4096, None).unwrap();
    assert_eq!(rt.live_bytes(MemoryKind::Pinned), 0);

    let pinned = registry.get_or_create(MemoryKind::Pinned, None).unwrap();
    let ptr = pinned.allocate(1024, DEFAULT_ALIGNMENT).unwrap();
    assert_eq!(rt.allocations(MemoryKind::Pinned), 2);
    unsafe { pinned.deallocate(ptr, 1024, DEFAULT_ALIGNMENT) };
}

#[test]
fn test_pool_stats_after_preallocate() {
    let rt = runtime(1);
    let registry = registry(&rt, PolicyFlags::new());
    registry.preallocate(MemoryKind::Pinned, 10_000, None).unwrap();

    let pinned = registry.get_or_create(MemoryKind::Pinned, None).unwrap();
    let stats = find_pool(&*pinned).unwrap().stats();
    assert_eq!(stats.reserved_bytes, 10_240);
    assert_eq!(stats.free_bytes, 10_240);
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.upstream_allocations, 1);
}

#[test]
fn test_preallocate_reports_allocation_failure() {
    let rt = runtime(1);
    let registry = registry(&rt, PolicyFlags::new());
    rt.set_fail_allocations(true);
    assert!(registry.preallocate(MemoryKind::Pinned, 4096, None).is_err());

    // The allocator itself was built and stays published
    assert_eq!(registry.constructed(), 1);
    rt.set_fail_allocations(false);
    assert!(registry.preallocate(MemoryKind::Pinned, 4096, None).is_ok());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_allocation_within_preallocation_does_not_grow(
        reserve in 1usize..(1 << 20),
        fraction in 0.0f64..=1.0,
    ) {
        let rt = runtime(1);
        let registry = registry(&rt, PolicyFlags::new());
        registry.preallocate(MemoryKind::Pinned, reserve, None).unwrap();
        let grown = rt.allocations(MemoryKind::Pinned);

        let request = ((reserve as f64) * fraction) as usize;
        let pinned = registry.get_or_create(MemoryKind::Pinned, None).unwrap();
        let ptr = pinned.allocate(request, DEFAULT_ALIGNMENT).unwrap();
        prop_assert_eq!(rt.allocations(MemoryKind::Pinned), grown);
        unsafe { pinned.deallocate(ptr, request, DEFAULT_ALIGNMENT) };
    }

    #[test]
    fn prop_release_unused_returns_everything_cached(
        sizes in proptest::collection::vec(1usize..100_000, 1..16),
    ) {
        let rt = runtime(1);
        let registry = registry(&rt, PolicyFlags::new());
        for &size in &sizes {
            registry.preallocate(MemoryKind::Pinned, size, None).unwrap();
        }
        let cached = rt.live_bytes(MemoryKind::Pinned);
        prop_assert_eq!(registry.release_unused(), cached);
        prop_assert_eq!(rt.live_bytes(MemoryKind::Pinned), 0);
        prop_assert_eq!(registry.release_unused(), 0);
    }
}
