//! Tool availability checking for device management
//!
//! Resolves the external binaries the rig drives: `adb` and `emulator` from the
//! Android SDK, `xcrun simctl` on macOS, and the `appium` automation server.

use std::path::{Path, PathBuf};

use rig_core::prelude::*;

/// Resolved locations of external tools
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    /// Path to `adb` if found
    pub adb_path: Option<String>,

    /// Path to the Android `emulator` command if found
    pub emulator_path: Option<String>,

    /// Whether `xcrun simctl` is available (macOS with Xcode)
    pub xcrun_simctl: bool,

    /// Path to the `appium` server if found
    pub appium_path: Option<String>,
}

impl ToolAvailability {
    /// Check tool availability (run once at startup)
    pub fn check() -> Self {
        let availability = Self {
            adb_path: Self::find_android_tool("adb", "platform-tools"),
            emulator_path: Self::find_android_tool("emulator", "emulator"),
            xcrun_simctl: Self::check_xcrun_simctl(),
            appium_path: resolve("appium"),
        };
        debug!("Tool availability: {:?}", availability);
        availability
    }

    /// Check if xcrun is present
    fn check_xcrun_simctl() -> bool {
        // Only available on macOS
        #[cfg(not(target_os = "macos"))]
        return false;

        #[cfg(target_os = "macos")]
        {
            resolve("xcrun").is_some()
        }
    }

    /// Find an Android SDK tool on PATH or under the SDK root
    fn find_android_tool(tool: &str, sdk_subdir: &str) -> Option<String> {
        if let Some(found) = resolve(tool) {
            return Some(found);
        }

        Self::get_sdk_candidates(tool, sdk_subdir)
            .into_iter()
            .find(|candidate| candidate.is_file())
            .map(|candidate| canonical(&candidate))
    }

    /// Candidate tool paths under ANDROID_HOME / ANDROID_SDK_ROOT
    fn get_sdk_candidates(tool: &str, sdk_subdir: &str) -> Vec<PathBuf> {
        let file_name = if cfg!(windows) {
            format!("{}.exe", tool)
        } else {
            tool.to_string()
        };

        ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|root| PathBuf::from(root).join(sdk_subdir).join(&file_name))
            .collect()
    }

    /// Path to invoke for adb, falling back to PATH lookup at exec time
    pub fn adb(&self) -> &str {
        self.adb_path.as_deref().unwrap_or("adb")
    }

    /// Path to adb, or a fatal error when it cannot be resolved
    pub fn require_adb(&self) -> Result<&str> {
        self.adb_path
            .as_deref()
            .ok_or_else(|| Error::tool_not_found("adb", ANDROID_HINT))
    }

    /// Path to the emulator command, or a fatal error when it cannot be resolved
    pub fn require_emulator(&self) -> Result<&str> {
        self.emulator_path
            .as_deref()
            .ok_or_else(|| Error::tool_not_found("emulator", ANDROID_HINT))
    }

    /// Fatal error unless `xcrun simctl` is usable
    pub fn require_simctl(&self) -> Result<()> {
        match self.ios_unavailable_message() {
            None => Ok(()),
            Some(hint) => Err(Error::tool_not_found("xcrun simctl", hint)),
        }
    }

    /// Path to appium, falling back to PATH lookup at exec time
    pub fn appium(&self) -> &str {
        self.appium_path.as_deref().unwrap_or("appium")
    }

    /// Get user-friendly message for unavailable iOS tools
    pub fn ios_unavailable_message(&self) -> Option<&'static str> {
        if self.xcrun_simctl {
            None
        } else {
            #[cfg(target_os = "macos")]
            {
                Some("Xcode not installed. Install Xcode to manage iOS simulators.")
            }

            #[cfg(not(target_os = "macos"))]
            {
                Some("iOS simulators are only available on macOS.")
            }
        }
    }

    /// Get user-friendly message for unavailable Android tools
    pub fn android_unavailable_message(&self) -> Option<&'static str> {
        if self.adb_path.is_some() && self.emulator_path.is_some() {
            None
        } else {
            Some(ANDROID_HINT)
        }
    }
}

const ANDROID_HINT: &str = "Android SDK not found. Set ANDROID_HOME or install Android Studio.";

fn resolve(tool: &str) -> Option<String> {
    which::which(tool)
        .inspect_err(|e| trace!("{} not on PATH: {}", tool, e))
        .ok()
        .map(|path| canonical(&path))
}

fn canonical(path: &Path) -> String {
    dunce::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
