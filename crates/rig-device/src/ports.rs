//! Host TCP port inspection and release
//!
//! Unix-like hosts enumerate listeners with `lsof`, Windows with `netstat`.
//! The listing parsers are plain functions over [`HostOs`], so both syntaxes
//! are covered by tests on any host.

use std::sync::Arc;
use std::time::Duration;

use rig_core::prelude::*;
use rig_core::{CommandResult, PollBudgets, PollSpec, PortState};

use crate::process::{CommandSpec, ProcessExecutor};

/// Command dialect of the host running the rig
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Unix,
    Windows,
}

impl HostOs {
    pub fn current() -> Self {
        if cfg!(windows) {
            HostOs::Windows
        } else {
            HostOs::Unix
        }
    }

    /// Command listing TCP listeners for `port`
    pub fn listing_command(&self, port: u16) -> CommandSpec {
        match self {
            HostOs::Unix => CommandSpec::shell(format!("lsof -nP -iTCP:{} -sTCP:LISTEN", port)),
            HostOs::Windows => CommandSpec::shell("netstat -ano -p TCP"),
        }
    }

    /// Command force-killing `pid`
    pub fn kill_command(&self, pid: u32) -> CommandSpec {
        match self {
            HostOs::Unix => CommandSpec::shell(format!("kill -9 {}", pid)),
            HostOs::Windows => CommandSpec::shell(format!("taskkill /F /PID {}", pid)),
        }
    }

    /// Command printing the parent process id of `pid`
    pub fn parent_command(&self, pid: u32) -> CommandSpec {
        match self {
            HostOs::Unix => CommandSpec::shell(format!("ps -o ppid= -p {}", pid)),
            HostOs::Windows => CommandSpec::shell(format!(
                "powershell -NoProfile -Command \"(Get-CimInstance Win32_Process -Filter 'ProcessId={}').ParentProcessId\"",
                pid
            )),
        }
    }

    /// Interpret a listing command result as the state of `port`
    pub fn parse_listing(&self, port: u16, result: &CommandResult) -> Result<PortState> {
        match self {
            HostOs::Unix => {
                // lsof exits 1 with no output when nothing matches
                if result.exit_code == Some(1)
                    && result.stdout.trim().is_empty()
                    && result.stderr.trim().is_empty()
                {
                    return Ok(PortState::free(port));
                }
                if !result.success() {
                    return Err(Error::process(format!(
                        "lsof failed for port {}: {}",
                        port,
                        result.diagnostic()
                    )));
                }
                Ok(state_from_pids(port, parse_lsof_pids(port, &result.stdout)))
            }
            HostOs::Windows => {
                if !result.success() {
                    return Err(Error::process(format!(
                        "netstat failed: {}",
                        result.diagnostic()
                    )));
                }
                Ok(state_from_pids(port, parse_netstat_pids(port, &result.stdout)))
            }
        }
    }
}

/// Parent links followed before giving up on an ancestry check
const MAX_ANCESTRY_DEPTH: usize = 8;

fn state_from_pids(port: u16, pids: Vec<u32>) -> PortState {
    if pids.is_empty() {
        PortState::free(port)
    } else {
        PortState::occupied(port, pids)
    }
}

/// Extract listener PIDs from `lsof -nP -iTCP:<port> -sTCP:LISTEN` output
///
/// ```text
/// COMMAND   PID  USER   FD   TYPE DEVICE SIZE/OFF NODE NAME
/// node    41233  ci     23u  IPv4 0x1f      0t0  TCP 127.0.0.1:4723 (LISTEN)
/// ```
pub fn parse_lsof_pids(port: u16, output: &str) -> Vec<u32> {
    let suffix = format!(":{}", port);
    let mut pids = Vec::new();

    for line in output.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < 2 || columns[0] == "COMMAND" {
            continue;
        }
        let bound_here = columns
            .iter()
            .any(|c| c.ends_with(&suffix) || c.contains(&format!("{}->", suffix)));
        if !bound_here {
            continue;
        }
        if let Ok(pid) = columns[1].parse::<u32>() {
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }

    pids
}

/// Extract listener PIDs for `port` from `netstat -ano -p TCP` output
///
/// ```text
///   Proto  Local Address          Foreign Address        State           PID
///   TCP    0.0.0.0:4723           0.0.0.0:0              LISTENING       9124
/// ```
pub fn parse_netstat_pids(port: u16, output: &str) -> Vec<u32> {
    let suffix = format!(":{}", port);
    let mut pids = Vec::new();

    for line in output.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < 5 || !columns[0].eq_ignore_ascii_case("TCP") {
            continue;
        }
        if !columns[1].ends_with(&suffix) || columns[3] != "LISTENING" {
            continue;
        }
        if let Ok(pid) = columns[4].parse::<u32>() {
            if pid != 0 && !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }

    pids
}

/// Checks and frees TCP ports on the host
pub struct PortManager<E> {
    executor: Arc<E>,
    os: HostOs,
    release_attempts: u32,
    interval: Duration,
}

impl<E> Clone for PortManager<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            os: self.os,
            release_attempts: self.release_attempts,
            interval: self.interval,
        }
    }
}

impl<E: ProcessExecutor> PortManager<E> {
    pub fn new(executor: Arc<E>, budgets: &PollBudgets) -> Self {
        Self {
            executor,
            os: HostOs::current(),
            release_attempts: budgets.port_free,
            interval: budgets.interval(),
        }
    }

    /// Use the command dialect of `os` instead of the running host's
    pub fn with_os(mut self, os: HostOs) -> Self {
        self.os = os;
        self
    }

    pub fn os(&self) -> HostOs {
        self.os
    }

    /// Current listener state of `port`
    pub async fn port_state(&self, port: u16) -> Result<PortState> {
        let result = self.executor.run(&self.os.listing_command(port)).await?;
        self.os.parse_listing(port, &result)
    }

    /// Whether nothing is listening on `port`
    pub async fn is_port_available(&self, port: u16) -> Result<bool> {
        Ok(!self.port_state(port).await?.occupied)
    }

    /// Parent of `pid`, `None` when it cannot be read
    pub async fn parent_pid(&self, pid: u32) -> Option<u32> {
        match self.executor.run(&self.os.parent_command(pid)).await {
            Ok(result) if result.success() => result.stdout_trimmed().parse().ok(),
            Ok(result) => {
                trace!("no parent for PID {}: {}", pid, result.diagnostic());
                None
            }
            Err(e) => {
                debug!("reading parent of PID {} failed: {}", pid, e);
                None
            }
        }
    }

    /// Whether `pid` is `ancestor` itself or runs somewhere below it
    ///
    /// Launchers such as `appium.cmd` or `npx` leave the listening process a
    /// few levels under the process that was spawned.
    pub async fn is_descendant_of(&self, pid: u32, ancestor: u32) -> bool {
        let mut current = pid;
        for _ in 0..MAX_ANCESTRY_DEPTH {
            if current == ancestor {
                return true;
            }
            match self.parent_pid(current).await {
                Some(parent) if parent > 1 && parent != current => current = parent,
                _ => return false,
            }
        }
        false
    }

    /// Kill whatever listens on `port` and verify the port is released
    ///
    /// Succeeds without side effects when the port is already free.
    pub async fn kill_process_on_port(&self, port: u16) -> Result<()> {
        let state = self.port_state(port).await?;
        if !state.occupied {
            debug!("Port {} already free", port);
            return Ok(());
        }

        info!("Freeing port {} held by PIDs {:?}", port, state.pids);
        for pid in &state.pids {
            let result = self.executor.run(&self.os.kill_command(*pid)).await?;
            if !result.success() {
                warn!("Failed to kill PID {}: {}", pid, result.diagnostic());
            }
        }

        PollSpec::new(format!("port {} to be released", port), self.release_attempts)
            .interval(self.interval)
            .run(move || async move { self.is_port_available(port).await })
            .await
            .map_err(|e| match e {
                Error::PollTimeout { attempts, .. } => Error::port(
                    port,
                    format!(
                        "still in use after killing PIDs {:?} ({} checks)",
                        state.pids, attempts
                    ),
                ),
                other => other,
            })?;

        info!("Port {} released", port);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_lsof_pids, parse_netstat_pids, HostOs, PortManager};
    use crate::test_utils::FakeExecutor;
    use rig_core::{CommandResult, Error, PollBudgets};
    use std::sync::Arc;

    const LSOF_LISTEN: &str = "\
COMMAND   PID USER   FD   TYPE             DEVICE SIZE/OFF NODE NAME
node    41233   ci   23u  IPv4 0x1f2e3d4c5b6a7988      0t0  TCP 127.0.0.1:4723 (LISTEN)
node    41233   ci   24u  IPv6 0x1f2e3d4c5b6a7989      0t0  TCP [::1]:4723 (LISTEN)
";

    const NETSTAT: &str = "
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1044
  TCP    0.0.0.0:4723           0.0.0.0:0              LISTENING       9124
  TCP    0.0.0.0:47230          0.0.0.0:0              LISTENING       7777
  TCP    127.0.0.1:52011        127.0.0.1:4723         ESTABLISHED     3300
";

    fn manager(fake: &Arc<FakeExecutor>) -> PortManager<FakeExecutor> {
        PortManager::new(Arc::clone(fake), &PollBudgets::default()).with_os(HostOs::Unix)
    }

    #[test]
    fn test_parse_lsof_dedupes_pids() {
        assert_eq!(parse_lsof_pids(4723, LSOF_LISTEN), vec![41233]);
        assert!(parse_lsof_pids(4724, LSOF_LISTEN).is_empty());
    }

    #[test]
    fn test_parse_netstat_matches_exact_port_and_listening_only() {
        assert_eq!(parse_netstat_pids(4723, NETSTAT), vec![9124]);
        assert_eq!(parse_netstat_pids(135, NETSTAT), vec![1044]);
        assert!(parse_netstat_pids(52011, NETSTAT).is_empty());
    }

    #[test]
    fn test_lsof_exit_one_without_output_is_free() {
        let state = HostOs::Unix
            .parse_listing(4723, &CommandResult::failed(1, ""))
            .unwrap();
        assert!(!state.occupied);
    }

    #[test]
    fn test_missing_lsof_is_an_error_not_free() {
        let err = HostOs::Unix
            .parse_listing(4723, &CommandResult::failed(127, "sh: lsof: not found"))
            .unwrap_err();
        assert!(err.to_string().contains("lsof"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_windows_kill_command() {
        assert_eq!(
            HostOs::Windows.kill_command(9124).to_string(),
            "taskkill /F /PID 9124"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_with_listener_is_not_available() {
        let fake = Arc::new(FakeExecutor::new());
        fake.on("lsof -nP -iTCP:4723", CommandResult::ok(LSOF_LISTEN));

        let ports = manager(&fake);
        let state = ports.port_state(4723).await.unwrap();
        assert!(state.occupied);
        assert_eq!(state.pids, vec![41233]);
        assert!(!ports.is_port_available(4723).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_on_free_port_has_no_side_effects() {
        let fake = Arc::new(FakeExecutor::new());
        fake.on("lsof", CommandResult::failed(1, ""));

        manager(&fake).kill_process_on_port(4723).await.unwrap();
        assert!(!fake.called("kill -9"));
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_frees_port_and_verifies() {
        let fake = Arc::new(FakeExecutor::new());
        fake.on("lsof", CommandResult::ok(LSOF_LISTEN))
            .on("kill -9 41233", CommandResult::ok(""))
            .after("kill -9", "lsof", CommandResult::failed(1, ""));

        let ports = manager(&fake);
        ports.kill_process_on_port(4723).await.unwrap();
        assert!(fake.called("kill -9 41233"));
        assert!(ports.is_port_available(4723).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_fails_when_port_never_frees() {
        let fake = Arc::new(FakeExecutor::new());
        fake.on("lsof", CommandResult::ok(LSOF_LISTEN))
            .on("kill -9", CommandResult::failed(1, "Operation not permitted"));

        let err = manager(&fake).kill_process_on_port(4723).await.unwrap_err();
        assert!(matches!(err, Error::Port { port: 4723, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_descendant_walks_parent_chain() {
        let fake = Arc::new(FakeExecutor::new());
        fake.on("ps -o ppid= -p 5120", CommandResult::ok("  5110\n"))
            .on("ps -o ppid= -p 5110", CommandResult::ok("4001\n"))
            .on("ps -o ppid= -p 4001", CommandResult::ok("1\n"))
            .on("ps -o ppid= -p 5151", CommandResult::ok("1\n"));

        let ports = manager(&fake);
        assert!(ports.is_descendant_of(5120, 4001).await);
        assert!(ports.is_descendant_of(4001, 4001).await);
        assert!(!ports.is_descendant_of(5151, 4001).await);
        // Unknown process: ps exits non-zero
        assert!(!ports.is_descendant_of(7777, 4001).await);
        assert_eq!(ports.parent_pid(5120).await, Some(5110));
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_dialect_uses_netstat_and_taskkill() {
        let fake = Arc::new(FakeExecutor::new());
        fake.on("netstat -ano", CommandResult::ok(NETSTAT))
            .on("taskkill", CommandResult::ok("SUCCESS"))
            .after("taskkill", "netstat -ano", CommandResult::ok(""));

        let ports = manager(&fake).with_os(HostOs::Windows);
        ports.kill_process_on_port(4723).await.unwrap();
        assert!(fake.called("taskkill /F /PID 9124"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_listener_makes_port_unavailable() {
        use crate::process::SystemExecutor;

        if which::which("lsof").is_err() {
            eprintln!("lsof not installed, skipping");
            return;
        }

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let ports = PortManager::new(Arc::new(SystemExecutor::new()), &PollBudgets::default())
            .with_os(HostOs::Unix);

        assert!(!ports.is_port_available(port).await.unwrap());
        let state = ports.port_state(port).await.unwrap();
        assert!(state.pids.contains(&std::process::id()));

        drop(listener);
        assert!(ports.is_port_available(port).await.unwrap());
    }
}
