//! Unified error handling for memforge
//!
//! Every fallible operation in the crate returns [`MemResult`]. Errors are
//! categorized so callers can tell a bad argument (user error) apart from a
//! failing device runtime (backend error) or a bug (internal error).

use std::fmt;

use crate::memory::MemoryKind;

/// Unified error type for memforge
#[derive(Debug, Clone, thiserror::Error)]
pub enum MemForgeError {
    // ========== Argument Errors ==========
    /// Device index outside `[0, count)`
    #[error("{index} is not a valid device index. Should be 0 <= device_id < {count}")]
    InvalidDeviceIndex { index: usize, count: usize },

    /// Invalid size, alignment or other argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ========== Backend Errors ==========
    /// A device runtime call returned a failure code
    #[error("{call} failed with code {code}: {message}")]
    RuntimeCall {
        call: &'static str,
        code: i32,
        message: String,
    },

    /// No device present or runtime unavailable
    #[error("Device not found")]
    DeviceNotFound,

    /// Backing memory could not be obtained
    #[error("{kind} allocation of {size} bytes failed: {reason}")]
    AllocationFailed {
        kind: MemoryKind,
        size: usize,
        reason: String,
    },

    // ========== Internal Errors ==========
    /// Pointer handed back to a resource that never produced it
    #[error("{kind} resource does not own allocation at 0x{addr:x}")]
    UnknownAllocation { kind: MemoryKind, addr: usize },

    /// Global state was already set up
    #[error("Already initialized: {0}")]
    AlreadyInitialized(String),

    /// Lock poisoned (a thread panicked while holding registry state)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl MemForgeError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            MemForgeError::InvalidDeviceIndex { .. } | MemForgeError::InvalidArgument(_) => {
                ErrorCategory::User
            }

            MemForgeError::AllocationFailed { .. } => ErrorCategory::Recoverable,

            MemForgeError::RuntimeCall { .. } | MemForgeError::DeviceNotFound => {
                ErrorCategory::Backend
            }

            MemForgeError::UnknownAllocation { .. }
            | MemForgeError::AlreadyInitialized(_)
            | MemForgeError::LockPoisoned(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error may go away on retry
    ///
    /// Construction failures are never retried automatically; the slot that
    /// failed stays empty so a later call can try again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Recoverable | ErrorCategory::Backend
        )
    }

    /// Check if this is a user-facing error (actionable by users)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User error - invalid input
    User,
    /// Recoverable error - temporary condition
    Recoverable,
    /// Internal error - indicates a bug
    Internal,
    /// Backend error - device runtime failure
    Backend,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Recoverable => write!(f, "Recoverable"),
            ErrorCategory::Internal => write!(f, "Internal"),
            ErrorCategory::Backend => write!(f, "Backend"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for MemForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        MemForgeError::LockPoisoned(err.to_string())
    }
}

/// Result type used throughout memforge
pub type MemResult<T> = std::result::Result<T, MemForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_device_index_names_bound() {
        let err = MemForgeError::InvalidDeviceIndex { index: 3, count: 2 };
        let msg = err.to_string();
        assert!(msg.contains("3 is not a valid device index"));
        assert!(msg.contains("device_id < 2"));
        assert!(err.is_user_error());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_categories() {
        let runtime = MemForgeError::RuntimeCall {
            call: "hipMalloc",
            code: 2,
            message: "out of memory".to_string(),
        };
        assert_eq!(runtime.category(), ErrorCategory::Backend);
        assert!(runtime.is_recoverable());

        let alloc = MemForgeError::AllocationFailed {
            kind: MemoryKind::Pinned,
            size: 64,
            reason: "injected".to_string(),
        };
        assert_eq!(alloc.category(), ErrorCategory::Recoverable);

        let poisoned = MemForgeError::LockPoisoned("registry".to_string());
        assert!(poisoned.is_internal_error());
    }

    #[test]
    fn test_poison_error_conversion() {
        let lock = std::sync::Arc::new(std::sync::Mutex::new(0));
        let cloned = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        let err: MemForgeError = lock.lock().unwrap_err().into();
        assert!(matches!(err, MemForgeError::LockPoisoned(_)));
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::User.to_string(), "User");
        assert_eq!(ErrorCategory::Backend.to_string(), "Backend");
    }
}
