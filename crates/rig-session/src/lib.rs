//! # rig-session - Session Orchestration
//!
//! Ties device readiness from [`rig_device`] to the automation server and the
//! driver session a UI test talks to.
//!
//! ## Public API
//!
//! ### Configuration
//! - [`Settings`] - `.rig/config.toml` contents
//! - [`load_settings()`], [`apply_env_overrides()`] - Load and override
//!
//! ### Automation Server
//! - [`ServerLifecycleManager`] - Port reservation, start, verify, stop
//! - [`StatusProbe`], [`HttpStatusProbe`] - `/status` readiness check
//!
//! ### Sessions
//! - [`SessionFactory`], [`WebDriverSessionFactory`] - Driver session creation
//! - [`Capabilities`] - W3C new-session capabilities
//! - [`SessionRegistry`] - Per-thread driver handle slots
//! - [`Rig`] - Full bring-up and teardown
//! - [`run_blocking()`] - Per-thread runtime for synchronous test workers

pub mod capabilities;
pub mod config;
pub mod driver;
pub mod environment;
pub mod registry;
pub mod server;

pub use capabilities::Capabilities;
pub use config::{apply_env_overrides, init_config_dir, load_settings, load_settings_file, Settings};
pub use driver::{SessionFactory, WebDriverSession, WebDriverSessionFactory};
pub use environment::{run_blocking, Rig};
pub use registry::{SessionContext, SessionGuard, SessionRegistry};
pub use server::{
    HttpStatusProbe, ServerConfig, ServerHandle, ServerLifecycleManager, ServerState, StatusProbe,
};
