//! # rig-core - Core Domain Types
//!
//! Foundation crate for mobile-rig. Provides domain types, error handling,
//! logging setup, and the bounded polling engine every readiness check uses.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing, tokio time).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Platform`], [`DeviceKind`], [`EnvironmentTag`] - What is being tested
//! - [`DeviceSession`] - The device selected for a test session
//! - [`EnvironmentConfig`] - Read-only resolved environment description
//! - [`CommandResult`] - Captured output of an external command
//! - [`PortState`] - Listener state of a host TCP port
//! - [`PollBudgets`] - Attempt caps for every bounded wait
//!
//! ### Polling (`polling`)
//! - [`poll_until()`] / [`PollSpec`] - Bounded fixed-interval condition polling
//! - [`ErrorPolicy`] - Continue vs. assume-satisfied on check errors
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use rig_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod polling;
pub mod types;

/// Prelude for common imports used throughout all mobile-rig crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, Result, ResultExt};
pub use polling::{poll_until, ErrorPolicy, PollSpec};
pub use types::{
    CommandResult, DeviceKind, DeviceSession, EnvironmentConfig, EnvironmentTag, Platform,
    PollBudgets, PortState, ResetFlags, DEFAULT_POLL_INTERVAL,
};
