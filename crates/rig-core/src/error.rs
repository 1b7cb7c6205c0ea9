//! Error types shared by every mobile-rig crate
//!
//! Errors fall into three tiers:
//! - fatal: the environment is misconfigured or absent, abort immediately
//! - bounded: a polled condition never became true within its budget
//! - recoverable: a single command failed, the caller may retry

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Environment bring-up errors organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Required tool not found: {tool}. {hint}")]
    ToolNotFound { tool: String, hint: String },

    #[error("Process error: {message}")]
    Process { message: String },

    #[error("Failed to spawn `{command}`: {reason}")]
    ProcessSpawn { command: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Device Errors
    // ─────────────────────────────────────────────────────────────
    #[error("adb daemon error: {message}")]
    Daemon { message: String },

    #[error("No device available: {message}")]
    NoDevice { message: String },

    #[error("Device {device} did not respond to a shell probe")]
    DeviceUnresponsive { device: String },

    #[error("{interface} is disabled on {device}; enable it before running tests")]
    ConnectivityDisabled { device: String, interface: String },

    #[error("Simulator error: {message}")]
    Simulator { message: String },

    #[error("Unsupported: {message}")]
    Unsupported { message: String },

    #[error("Timed out waiting for {subject} after {attempts} attempts")]
    PollTimeout { subject: String, attempts: u32 },

    // ─────────────────────────────────────────────────────────────
    // Application Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to launch {app}: {message}")]
    AppLaunch { app: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Port / Server Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Port {port}: {message}")]
    Port { port: u16, message: String },

    #[error("Port {port} was taken by another process while the automation server was starting")]
    PortStolen { port: u16 },

    #[error("Automation server error: {message}")]
    Server { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No session is initialized for the current test thread")]
    SessionNotInitialized,

    #[error("Session error: {message}")]
    Session { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn tool_not_found(tool: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::ToolNotFound {
            tool: tool.into(),
            hint: hint.into(),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn process_spawn(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn daemon(message: impl Into<String>) -> Self {
        Self::Daemon {
            message: message.into(),
        }
    }

    pub fn no_device(message: impl Into<String>) -> Self {
        Self::NoDevice {
            message: message.into(),
        }
    }

    pub fn device_unresponsive(device: impl Into<String>) -> Self {
        Self::DeviceUnresponsive {
            device: device.into(),
        }
    }

    pub fn connectivity_disabled(device: impl Into<String>, interface: impl Into<String>) -> Self {
        Self::ConnectivityDisabled {
            device: device.into(),
            interface: interface.into(),
        }
    }

    pub fn simulator(message: impl Into<String>) -> Self {
        Self::Simulator {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn poll_timeout(subject: impl Into<String>, attempts: u32) -> Self {
        Self::PollTimeout {
            subject: subject.into(),
            attempts,
        }
    }

    pub fn app_launch(app: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AppLaunch {
            app: app.into(),
            message: message.into(),
        }
    }

    pub fn port(port: u16, message: impl Into<String>) -> Self {
        Self::Port {
            port,
            message: message.into(),
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Check if this error is a transient failure that a poll may retry through
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Json(_)
                | Error::Process { .. }
                | Error::ProcessSpawn { .. }
                | Error::Daemon { .. }
                | Error::Simulator { .. }
        )
    }

    /// Check if this error must abort the session without any retry
    ///
    /// A fatal error raised from inside a polled check short-circuits the poll.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ToolNotFound { .. }
                | Error::NoDevice { .. }
                | Error::DeviceUnresponsive { .. }
                | Error::ConnectivityDisabled { .. }
                | Error::Unsupported { .. }
                | Error::PollTimeout { .. }
                | Error::AppLaunch { .. }
                | Error::PortStolen { .. }
                | Error::ConfigInvalid { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::poll_timeout("emulator boot", 120);
        assert_eq!(
            err.to_string(),
            "Timed out waiting for emulator boot after 120 attempts"
        );

        let err = Error::tool_not_found("adb", "Install Android platform-tools.");
        assert!(err.to_string().contains("adb"));
        assert!(err.to_string().contains("platform-tools"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_fatal_tier() {
        assert!(Error::tool_not_found("adb", "").is_fatal());
        assert!(Error::no_device("no real device attached").is_fatal());
        assert!(Error::device_unresponsive("R58M").is_fatal());
        assert!(Error::connectivity_disabled("emulator-5554", "WiFi").is_fatal());
        assert!(Error::unsupported("real iOS devices").is_fatal());
        assert!(Error::PortStolen { port: 4723 }.is_fatal());
    }

    #[test]
    fn test_transient_errors_are_not_fatal() {
        assert!(!Error::process("exit 1").is_fatal());
        assert!(!Error::process_spawn("adb devices", "No such file").is_fatal());
        assert!(!Error::daemon("offline").is_fatal());
        assert!(Error::daemon("offline").is_recoverable());
    }

    #[test]
    fn test_poll_timeout_names_subject_and_attempts() {
        let err = Error::poll_timeout("SpringBoard on iPhone 15", 60);
        let msg = err.to_string();
        assert!(msg.contains("SpringBoard on iPhone 15"));
        assert!(msg.contains("60"));
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_connectivity_message() {
        let err = Error::connectivity_disabled("emulator-5554", "WiFi");
        assert_eq!(
            err.to_string(),
            "WiFi is disabled on emulator-5554; enable it before running tests"
        );
    }

    #[test]
    fn test_context_passes_error_through() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = res.context("reading config").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
