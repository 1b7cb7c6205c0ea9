//! W3C capabilities for new automation sessions

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use rig_core::prelude::*;
use rig_core::{DeviceSession, EnvironmentConfig, Platform};

/// Capabilities sent in the `alwaysMatch` block of a new-session request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "platformName")]
    pub platform_name: String,
    #[serde(rename = "appium:automationName")]
    pub automation_name: String,
    #[serde(rename = "appium:deviceName")]
    pub device_name: String,
    #[serde(rename = "appium:platformVersion", skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(rename = "appium:udid", skip_serializing_if = "Option::is_none")]
    pub udid: Option<String>,
    #[serde(rename = "appium:appPackage", skip_serializing_if = "Option::is_none")]
    pub app_package: Option<String>,
    #[serde(rename = "appium:appActivity", skip_serializing_if = "Option::is_none")]
    pub app_activity: Option<String>,
    #[serde(rename = "appium:bundleId", skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(rename = "appium:noReset")]
    pub no_reset: bool,
    #[serde(rename = "appium:fullReset")]
    pub full_reset: bool,
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

fn automation_name(platform: Platform) -> &'static str {
    match platform {
        Platform::Android => "UiAutomator2",
        Platform::IOS => "XCUITest",
    }
}

impl Capabilities {
    /// Capabilities for the app under test on a prepared device
    pub fn for_session(config: &EnvironmentConfig, device: &DeviceSession) -> Self {
        let (app_package, app_activity, bundle_id) = match config.platform {
            Platform::Android => (Some(config.app_id.clone()), config.app_activity.clone(), None),
            Platform::IOS => (None, None, Some(config.app_id.clone())),
        };

        let platform_version = Some(device.platform_version.clone()).filter(|v| !v.is_empty());

        Self {
            platform_name: config.platform.capability_name().to_string(),
            automation_name: automation_name(config.platform).to_string(),
            device_name: device.display_name.clone(),
            platform_version,
            udid: device.identifier.clone(),
            app_package,
            app_activity,
            bundle_id,
            no_reset: config.reset.no_reset,
            full_reset: config.reset.full_reset,
            additional: Map::new(),
        }
    }

    /// Add a vendor capability; keys without a prefix get `appium:`
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        let key = if key.contains(':') {
            key.to_string()
        } else {
            format!("appium:{}", key)
        };
        self.additional.insert(key, value.into());
        self
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Body of `POST /session`
    pub fn new_session_payload(&self) -> Result<Value> {
        Ok(json!({
            "capabilities": {
                "alwaysMatch": self.to_json()?,
                "firstMatch": [{}]
            }
        }))
    }
}
