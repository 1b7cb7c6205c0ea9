//! Configuration types for mobile-rig

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use rig_core::prelude::*;
use rig_core::{DeviceKind, EnvironmentConfig, EnvironmentTag, Platform, PollBudgets, ResetFlags};

/// Contents of `.rig/config.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub environment: EnvironmentSettings,

    #[serde(default)]
    pub app: AppSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub polling: PollBudgets,
}

/// Which device the tests run on
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvironmentSettings {
    #[serde(default)]
    pub platform: Platform,

    #[serde(default)]
    pub device_kind: DeviceKind,

    #[serde(default = "default_platform_version")]
    pub platform_version: String,

    /// AVD name, simulator name, or physical device serial
    #[serde(default = "default_device_name")]
    pub device_name: String,

    #[serde(default)]
    pub env: EnvironmentTag,

    #[serde(default)]
    pub full_reset: bool,

    #[serde(default)]
    pub no_reset: bool,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            device_kind: DeviceKind::default(),
            platform_version: default_platform_version(),
            device_name: default_device_name(),
            env: EnvironmentTag::default(),
            full_reset: false,
            no_reset: false,
        }
    }
}

fn default_platform_version() -> String {
    "14".to_string()
}

fn default_device_name() -> String {
    "Pixel_7_API_34".to_string()
}

/// Per-environment identifiers of the app under test
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppIds {
    #[serde(default)]
    pub stage: String,

    #[serde(default)]
    pub prod: String,

    /// Launch activity (Android only)
    #[serde(default)]
    pub activity: Option<String>,
}

impl AppIds {
    pub fn for_env(&self, env: EnvironmentTag) -> &str {
        match env {
            EnvironmentTag::Stage => &self.stage,
            EnvironmentTag::Prod => &self.prod,
        }
    }
}

/// `[app.android]` package names and `[app.ios]` bundle ids
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppSettings {
    #[serde(default)]
    pub android: AppIds,

    #[serde(default)]
    pub ios: AppIds,
}

/// Automation server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Insecure features to allow (e.g. `adb_shell`)
    #[serde(default)]
    pub allow_insecure: Vec<String>,

    #[serde(default)]
    pub relaxed_security: bool,

    /// Server executable; resolved from PATH when unset
    #[serde(default)]
    pub binary: Option<String>,

    /// Directory for server logs; platform data dir when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            base_path: default_base_path(),
            allow_insecure: Vec::new(),
            relaxed_security: false,
            binary: None,
            log_dir: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4723
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_path() -> String {
    "/".to_string()
}

impl Settings {
    /// Resolve the read-only environment description for this run
    pub fn resolve(&self) -> Result<EnvironmentConfig> {
        let env = &self.environment;
        let ids = match env.platform {
            Platform::Android => &self.app.android,
            Platform::IOS => &self.app.ios,
        };

        let app_id = ids.for_env(env.env).trim();
        if app_id.is_empty() {
            return Err(Error::config_invalid(format!(
                "no app id configured for [app.{}] {}",
                env.platform.as_str(),
                env.env
            )));
        }
        if self.server.port == 0 {
            return Err(Error::config_invalid("server port must be non-zero"));
        }
        if env.platform == Platform::Android
            && env.device_kind == DeviceKind::Virtual
            && env.device_name.trim().is_empty()
        {
            return Err(Error::config_invalid(
                "device_name must name an AVD for virtual Android devices",
            ));
        }
        if env.full_reset && env.no_reset {
            warn!("Both full_reset and no_reset set; full_reset takes precedence");
        }

        Ok(EnvironmentConfig {
            platform: env.platform,
            device_kind: env.device_kind,
            platform_version: env.platform_version.clone(),
            device_name: env.device_name.clone(),
            environment: env.env,
            app_id: app_id.to_string(),
            app_activity: match env.platform {
                Platform::Android => ids.activity.clone(),
                Platform::IOS => None,
            },
            reset: ResetFlags {
                full_reset: env.full_reset,
                no_reset: env.no_reset && !env.full_reset,
            },
            server_host: self.server.host.clone(),
            server_port: self.server.port,
        })
    }
}
