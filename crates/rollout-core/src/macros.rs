//! Invariant checking macros for the domain layer.
//!
//! # Design Principles
//!
//! - **Zero panic**: All macros return `Result`, never panic
//! - **Zero unwrap**: No `unwrap()` or `expect()` anywhere
//! - **Consistent error messages**: Standardized format across all invariants
//!
//! # Example
//!
//! ```rust
//! use rollout_core::{invariant, DeploymentError};
//!
//! fn check_not_stopped(is_stopped: bool) -> Result<(), DeploymentError> {
//!     invariant!(!is_stopped, DeploymentError::Stopped);
//!     Ok(())
//! }
//!
//! assert!(check_not_stopped(false).is_ok());
//! assert_eq!(check_not_stopped(true), Err(DeploymentError::Stopped));
//! ```

/// Runtime invariant check with custom error.
///
/// Returns early with `Err(error_expression)` when the condition does not hold.
/// The optional message is emitted as a `tracing` debug event on violation.
///
/// # Syntax
///
/// ```rust,ignore
/// invariant!(condition, error_expression);
/// invariant!(condition, error_expression, "message format {arg}", arg);
/// ```
#[macro_export]
macro_rules! invariant {
    ($condition:expr, $error:expr $(,)?) => {
        if !$condition {
            return Err($error);
        }
    };
    ($condition:expr, $error:expr, $($msg:tt)+) => {
        if !$condition {
            $crate::__private::tracing::debug!($($msg)+);
            return Err($error);
        }
    };
}
