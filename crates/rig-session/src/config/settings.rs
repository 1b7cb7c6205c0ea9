//! Settings loader for .rig/config.toml

use std::path::{Path, PathBuf};

use super::types::Settings;
use rig_core::prelude::*;

const CONFIG_FILENAME: &str = "config.toml";
const RIG_DIR: &str = ".rig";

/// Environment variables that override file settings
pub const ENV_PLATFORM: &str = "RIG_PLATFORM";
pub const ENV_DEVICE_NAME: &str = "RIG_DEVICE_NAME";
pub const ENV_ENVIRONMENT: &str = "RIG_ENV";
pub const ENV_SERVER_PORT: &str = "RIG_SERVER_PORT";

/// Path of the project config file
pub fn config_path(project_path: &Path) -> PathBuf {
    project_path.join(RIG_DIR).join(CONFIG_FILENAME)
}

/// Load settings from .rig/config.toml
///
/// A missing file yields defaults. A file that exists but cannot be read or
/// parsed is an error: a half-understood environment must not start a run.
pub fn load_settings(project_path: &Path) -> Result<Settings> {
    let path = config_path(project_path);

    if !path.exists() {
        debug!("No config file at {:?}, using defaults", path);
        return Ok(Settings::default());
    }

    load_settings_file(&path)
}

/// Load settings from an explicit file, which must exist
pub fn load_settings_file(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(Error::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("Failed to read {:?}: {}", path, e)))?;

    let settings = toml::from_str(&content)
        .map_err(|e| Error::config_invalid(format!("{}: {}", path.display(), e)))?;

    debug!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Apply `RIG_*` overrides from the process environment
pub fn apply_env_overrides(settings: &mut Settings) -> Result<()> {
    apply_overrides_from(settings, |key| std::env::var(key).ok())
}

/// Apply overrides using `lookup` to read variables
pub fn apply_overrides_from<F>(settings: &mut Settings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(value) = read(ENV_PLATFORM) {
        settings.environment.platform = value
            .parse()
            .map_err(|e| Error::config_invalid(format!("{}: {}", ENV_PLATFORM, e)))?;
    }
    if let Some(value) = read(ENV_DEVICE_NAME) {
        settings.environment.device_name = value;
    }
    if let Some(value) = read(ENV_ENVIRONMENT) {
        settings.environment.env = value
            .parse()
            .map_err(|e| Error::config_invalid(format!("{}: {}", ENV_ENVIRONMENT, e)))?;
    }
    if let Some(value) = read(ENV_SERVER_PORT) {
        settings.server.port = value.trim().parse().map_err(|_| {
            Error::config_invalid(format!("{}: '{}' is not a port number", ENV_SERVER_PORT, value))
        })?;
    }

    Ok(())
}

/// Create a default .rig/config.toml if none exists
pub fn init_config_dir(project_path: &Path) -> Result<()> {
    let rig_dir = project_path.join(RIG_DIR);

    if !rig_dir.exists() {
        std::fs::create_dir_all(&rig_dir)
            .map_err(|e| Error::config(format!("Failed to create .rig dir: {}", e)))?;
    }

    let path = rig_dir.join(CONFIG_FILENAME);
    if !path.exists() {
        std::fs::write(&path, generate_default_config())
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Created {:?}", path);
    }

    Ok(())
}

fn generate_default_config() -> String {
    r#"# mobile-rig configuration

[environment]
platform = "android"        # android | ios
device_kind = "virtual"     # virtual | real
platform_version = "14"
device_name = "Pixel_7_API_34"  # AVD name, simulator name, or device serial
env = "stage"               # stage | prod
full_reset = false
no_reset = false

[app.android]
stage = ""
prod = ""
activity = ".MainActivity"

[app.ios]
stage = ""
prod = ""

[server]
host = "127.0.0.1"
port = 4723
log_level = "info"
base_path = "/"
allow_insecure = []
relaxed_security = false

[polling]
interval_ms = 1000
"#
    .to_string()
}
