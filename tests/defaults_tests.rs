//! Free functions over the process-wide registry
//!
//! These share one registry, so every test runs serially.

mod common;

use std::sync::Arc;

use common::{same_resource, serial};
use memforge::memory::{MallocResource, MemoryKind, DEFAULT_ALIGNMENT};
use memforge::registry::defaults;
use memforge::registry::ResourceRegistry;
use memforge::{MemForgeError, MemoryResource, PolicyFlags, RawResource, ResourceHandle};

static STATIC_HOST: MallocResource = MallocResource;

#[test]
#[serial]
fn test_share_default_returns_the_same_allocator() {
    let a = defaults::share_default(MemoryKind::Host, None).unwrap();
    let b = memforge::share_default(MemoryKind::Host, None).unwrap();
    assert!(same_resource(&a, &b));
}

#[test]
#[serial]
fn test_get_default_is_non_owning() {
    let custom: ResourceHandle = Arc::new(MallocResource::new());
    defaults::set_default(MemoryKind::Host, None, custom.clone()).unwrap();

    let weak = defaults::get_default(MemoryKind::Host, None).unwrap();
    assert_eq!(Arc::strong_count(&custom), 2);
    assert!(weak.upgrade().is_some());

    defaults::set_default(MemoryKind::Host, None, Arc::new(MallocResource::new())).unwrap();
    drop(custom);
    assert!(weak.upgrade().is_none());
}

#[test]
#[serial]
fn test_set_default_raw_unowned() {
    defaults::set_default_raw(MemoryKind::Host, None, RawResource::Unowned(&STATIC_HOST)).unwrap();
    let host = defaults::share_default(MemoryKind::Host, None).unwrap();
    let ptr = host.allocate(32, 32).unwrap();
    unsafe { host.deallocate(ptr, 32, 32) };

    // Replacing the unowned default leaves the static untouched
    defaults::set_default_raw(
        MemoryKind::Host,
        None,
        RawResource::Owned(Box::new(MallocResource::new())),
    )
    .unwrap();
    assert_eq!(STATIC_HOST.kind(), MemoryKind::Host);
}

#[test]
#[serial]
fn test_set_default_rejects_mismatched_kind() {
    let host: ResourceHandle = Arc::new(MallocResource::new());
    let err = defaults::set_default(MemoryKind::Pinned, None, host).unwrap_err();
    assert!(matches!(err, MemForgeError::InvalidArgument(_)));
}

#[test]
#[serial]
fn test_preallocate_helpers() {
    defaults::preallocate_pinned_memory(1 << 16).unwrap();
    defaults::preallocate_device_memory(1 << 16, None).unwrap();
    defaults::preallocate(MemoryKind::Managed, 1 << 12, None).unwrap();
    defaults::preallocate(MemoryKind::Host, 0, None).unwrap();

    let pinned = defaults::share_default(MemoryKind::Pinned, None).unwrap();
    let ptr = pinned.allocate(1 << 15, DEFAULT_ALIGNMENT).unwrap();
    unsafe { pinned.deallocate(ptr, 1 << 15, DEFAULT_ALIGNMENT) };
}

#[test]
#[serial]
fn test_release_unused_memory_never_fails() {
    defaults::release_unused_memory();
    defaults::preallocate_pinned_memory(4096).unwrap();
    defaults::release_unused_memory();
    assert_eq!(defaults::release_unused_memory(), 0);
}

#[test]
#[serial]
fn test_out_of_range_device() {
    let count = {
        defaults::share_default(MemoryKind::Device, Some(0)).unwrap();
        ResourceRegistry::global().device_count().unwrap()
    };
    let err = defaults::share_default(MemoryKind::Device, Some(count)).unwrap_err();
    assert!(err.is_user_error());
}

#[test]
#[serial]
fn test_free_device_resources_resets_table() {
    defaults::share_default(MemoryKind::Device, Some(0)).unwrap();
    assert!(ResourceRegistry::global().device_count().is_some());

    defaults::test_free_device_resources().unwrap();
    assert_eq!(ResourceRegistry::global().device_count(), None);

    defaults::share_default(MemoryKind::Device, Some(0)).unwrap();
    assert!(ResourceRegistry::global().device_count().is_some());
}

#[test]
#[serial]
fn test_shutdown_then_lookup_rebuilds() {
    let before = defaults::share_default(MemoryKind::Managed, None).unwrap();
    defaults::shutdown().unwrap();
    assert_eq!(ResourceRegistry::global().constructed(), 0);

    let after = defaults::share_default(MemoryKind::Managed, None).unwrap();
    assert_eq!(after.kind(), before.kind());
    assert_eq!(ResourceRegistry::global().constructed(), 1);
}

#[test]
#[serial]
fn test_install_global_after_first_use_fails() {
    let _ = ResourceRegistry::global();
    let custom = ResourceRegistry::new(memforge::default_runtime(), PolicyFlags::disabled());
    let err = ResourceRegistry::install_global(custom).unwrap_err();
    assert!(matches!(err, MemForgeError::AlreadyInitialized(_)));
}
