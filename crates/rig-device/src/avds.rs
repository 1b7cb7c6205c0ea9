//! Android AVD (Android Virtual Device) discovery and spawning
//!
//! AVDs are listed with `emulator -list-avds` and started with
//! `emulator -avd <name>`. Both go through the [`ProcessExecutor`].

use regex::Regex;
use std::sync::LazyLock;

use rig_core::prelude::*;

use crate::process::{CommandSpec, ProcessExecutor, ProcessHandle, SpawnSpec};
use crate::tool_availability::ToolAvailability;

/// Static regex pattern for extracting API level from AVD names
static API_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_API_(\d+)$").expect("Invalid API pattern regex"));

/// An Android Virtual Device (AVD)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidAvd {
    /// AVD name (used for the boot command)
    pub name: String,
    /// Friendly display name
    pub display_name: String,
    /// API level (e.g., 33 for Android 13)
    pub api_level: Option<u32>,
}

/// List all available Android AVDs
pub async fn list_android_avds<E: ProcessExecutor>(
    executor: &E,
    tools: &ToolAvailability,
) -> Result<Vec<AndroidAvd>> {
    let emulator = tools.require_emulator()?;
    let result = executor
        .run(&CommandSpec::argv(emulator, ["-list-avds"]))
        .await?;

    if !result.success() {
        return Err(Error::process(format!(
            "emulator -list-avds failed: {}",
            result.diagnostic()
        )));
    }

    Ok(parse_avd_list(&result.stdout))
}

/// Parse the output of `emulator -list-avds`
///
/// Output format is one AVD name per line. Recent emulators also print
/// `INFO |` diagnostics, which are skipped.
fn parse_avd_list(output: &str) -> Vec<AndroidAvd> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains('|'))
        .map(|name| {
            let (display_name, api_level) = parse_avd_name(name);
            AndroidAvd {
                name: name.to_string(),
                display_name,
                api_level,
            }
        })
        .collect()
}

/// Parse AVD name to extract display name and API level
///
/// - "Pixel_6_API_33" -> ("Pixel 6", Some(33))
/// - "Nexus_5X_API_29" -> ("Nexus 5X", Some(29))
/// - "My_Custom_AVD" -> ("My Custom AVD", None)
pub fn parse_avd_name(name: &str) -> (String, Option<u32>) {
    if let Some(caps) = API_PATTERN.captures(name) {
        let api_level = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let display = API_PATTERN.replace(name, "").replace('_', " ");
        return (display.trim().to_string(), api_level);
    }

    (name.replace('_', " "), None)
}

/// Command that boots `avd_name` from a cold start
pub fn boot_command(tools: &ToolAvailability, avd_name: &str) -> Result<CommandSpec> {
    let emulator = tools.require_emulator()?;
    Ok(CommandSpec::argv(
        emulator,
        ["-avd", avd_name, "-no-snapshot-load"],
    ))
}

/// Start an AVD in the background
///
/// Returns as soon as the emulator process is running; the caller waits for
/// the device to appear and boot.
pub async fn spawn_avd<E: ProcessExecutor>(
    executor: &E,
    tools: &ToolAvailability,
    avd_name: &str,
) -> Result<ProcessHandle> {
    let command = boot_command(tools, avd_name)?;
    info!("Starting emulator for AVD {}", avd_name);
    executor.spawn(&SpawnSpec::new(command)).await
}

#[cfg(test)]
mod tests {
    use super::{boot_command, list_android_avds, parse_avd_list, parse_avd_name, spawn_avd};
    use crate::test_utils::{fake_tools, FakeExecutor};
    use crate::tool_availability::ToolAvailability;
    use rig_core::CommandResult;

    #[test]
    fn test_parse_avd_name_with_api() {
        let (name, api) = parse_avd_name("Pixel_6_API_33");
        assert_eq!(name, "Pixel 6");
        assert_eq!(api, Some(33));
    }

    #[test]
    fn test_parse_avd_name_without_api() {
        let (name, api) = parse_avd_name("My_Custom_AVD");
        assert_eq!(name, "My Custom AVD");
        assert_eq!(api, None);
    }

    #[test]
    fn test_parse_avd_list_skips_info_lines() {
        let output = "INFO    | Storing crashdata in: /tmp/android/emu-crash\nPixel_6_API_33\n\nNexus_5X_API_29\n";
        let avds = parse_avd_list(output);
        assert_eq!(avds.len(), 2);
        assert_eq!(avds[0].name, "Pixel_6_API_33");
        assert_eq!(avds[1].api_level, Some(29));
    }

    #[test]
    fn test_boot_command_starts_cold() {
        let command = boot_command(&fake_tools(), "Pixel_7_API_34").unwrap();
        assert_eq!(
            command.to_string(),
            "emulator -avd Pixel_7_API_34 -no-snapshot-load"
        );
    }

    #[test]
    fn test_boot_command_requires_emulator() {
        assert!(boot_command(&ToolAvailability::default(), "Pixel_7").is_err());
    }

    #[tokio::test]
    async fn test_list_and_spawn_through_executor() {
        let fake = FakeExecutor::new();
        fake.on("-list-avds", CommandResult::ok("Pixel_7_API_34\n"));

        let avds = list_android_avds(&fake, &fake_tools()).await.unwrap();
        assert_eq!(avds[0].display_name, "Pixel 7");

        let handle = spawn_avd(&fake, &fake_tools(), "Pixel_7_API_34")
            .await
            .unwrap();
        assert!(handle.pid().is_some());
        assert_eq!(fake.spawned().len(), 1);
    }
}
