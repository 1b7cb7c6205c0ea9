//! Configuration file parsing for mobile-rig
//!
//! Supports:
//! - `.rig/config.toml` - Environment, app ids, server and polling settings
//! - `RIG_*` environment variables - Per-run overrides

pub mod settings;
pub mod types;

pub use settings::{
    apply_env_overrides, apply_overrides_from, config_path, init_config_dir, load_settings,
    load_settings_file, ENV_DEVICE_NAME, ENV_ENVIRONMENT, ENV_PLATFORM, ENV_SERVER_PORT,
};
pub use types::*;
