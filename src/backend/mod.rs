//! Device runtime backends

pub mod device_guard;
pub mod event_pool;
#[cfg(feature = "rocm")]
pub mod hip_backend;
pub mod runtime;
pub mod simulated;

pub use device_guard::DeviceGuard;
pub use event_pool::{EventPool, PooledEvent};
#[cfg(feature = "rocm")]
pub use hip_backend::HipRuntime;
pub use runtime::{default_runtime, DeviceRuntime, RuntimeEvent};
pub use simulated::{SimulatedRuntime, SimulatedRuntimeBuilder};
