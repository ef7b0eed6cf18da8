//! ROCm/HIP device runtime
//!
//! Compiled only with the `rocm` feature, which links `amdhip64`.

mod ffi;
mod runtime;

pub use runtime::{get_error_string, HipRuntime};
