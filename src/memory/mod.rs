//! Allocator interface and the default allocator backends
//!
//! Resources are chained: a pool draws blocks from an upstream resource and
//! caches them after they are freed. The backends here are deliberately
//! simple; the registry only cares about the chain shape and about tearing it
//! down in the right order.
//!
//! | Type | Kind | Chain |
//! |---|---|---|
//! | [`MallocResource`] | host | leaf |
//! | [`RuntimeResource`] | pinned, device, managed | leaf |
//! | [`PoolResource`] | any | pool over an upstream |
//! | [`VmPoolResource`] | device | self-contained pool |

pub mod composite;
pub(crate) mod free_tree;
pub mod introspect;
pub mod kind;
pub mod malloc;
pub mod pool;
pub mod resource;
pub mod teardown;
pub mod vm_pool;

pub use composite::{compose, CompositeResource};
pub use introspect::find_pool;
pub use kind::MemoryKind;
pub use malloc::{MallocResource, RuntimeResource};
pub use pool::PoolResource;
pub use resource::{
    MemoryResource, PoolCapability, PoolStats, ResourceHandle, UnownedResource, DEFAULT_ALIGNMENT,
};
pub use teardown::{release_guarded, LeakPolicy};
pub use vm_pool::VmPoolResource;
