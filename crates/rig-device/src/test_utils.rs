//! Test utilities for device control
//!
//! Provides a scripted [`FakeExecutor`] that stands in for real OS processes,
//! plus helpers for building tool and environment fixtures.
//!
//! Rules match on a substring of the rendered command line. When several rules
//! match, the longest pattern wins; ties go to the rule whose trigger fired
//! most recently, then to the rule registered last. Unmatched commands exit
//! with code 127, like a shell that cannot find the program.

use std::sync::Mutex;

use rig_core::{
    CommandResult, DeviceKind, EnvironmentConfig, EnvironmentTag, Error, Platform, ResetFlags,
    Result,
};

use crate::process::{CommandSpec, ProcessExecutor, ProcessHandle, SpawnSpec};
use crate::tool_availability::ToolAvailability;

#[derive(Debug, Clone)]
enum Reply {
    Output(CommandResult),
    Fail(String),
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    trigger: Option<String>,
    replies: Vec<Reply>,
    served: usize,
}

impl Rule {
    fn next_reply(&mut self) -> Reply {
        let index = self.served.min(self.replies.len().saturating_sub(1));
        self.served += 1;
        self.replies[index].clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Run,
    Spawn,
}

#[derive(Debug)]
struct Event {
    kind: EventKind,
    command: String,
}

#[derive(Debug, Default)]
struct FakeState {
    rules: Vec<Rule>,
    spawn_failures: Vec<(String, String)>,
    log: Vec<Event>,
    next_pid: u32,
}

impl FakeState {
    /// Position of the most recent event containing `trigger`
    fn last_seen(&self, trigger: &str) -> Option<usize> {
        self.log.iter().rposition(|e| e.command.contains(trigger))
    }

    fn select_rule(&self, command: &str) -> Option<usize> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| command.contains(&rule.pattern))
            .filter_map(|(index, rule)| match &rule.trigger {
                None => Some((index, rule.pattern.len(), None)),
                Some(trigger) => self
                    .last_seen(trigger)
                    .map(|seen| (index, rule.pattern.len(), Some(seen))),
            })
            .max_by_key(|&(index, len, seen)| (len, seen, index))
            .map(|(index, _, _)| index)
    }
}

/// Scripted process executor
#[derive(Debug, Default)]
pub struct FakeExecutor {
    state: Mutex<FakeState>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_pid: 4000,
                ..Default::default()
            }),
        }
    }

    fn push_rule(&self, pattern: &str, trigger: Option<&str>, replies: Vec<Reply>) -> &Self {
        assert!(!replies.is_empty(), "a rule needs at least one reply");
        self.lock().rules.push(Rule {
            pattern: pattern.to_string(),
            trigger: trigger.map(str::to_string),
            replies,
            served: 0,
        });
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer every command containing `pattern` with `result`
    pub fn on(&self, pattern: &str, result: CommandResult) -> &Self {
        self.push_rule(pattern, None, vec![Reply::Output(result)])
    }

    /// Answer successive matching commands in order; the last reply repeats
    pub fn on_seq(&self, pattern: &str, results: Vec<CommandResult>) -> &Self {
        self.push_rule(pattern, None, results.into_iter().map(Reply::Output).collect())
    }

    /// Like [`on`](Self::on), but only once a command containing `trigger`
    /// has been run or spawned
    pub fn after(&self, trigger: &str, pattern: &str, result: CommandResult) -> &Self {
        self.push_rule(pattern, Some(trigger), vec![Reply::Output(result)])
    }

    /// Make matching commands fail to execute at all
    pub fn on_error(&self, pattern: &str, message: &str) -> &Self {
        self.push_rule(pattern, None, vec![Reply::Fail(message.to_string())])
    }

    /// Make spawning a matching command fail
    pub fn on_spawn_error(&self, pattern: &str, message: &str) -> &Self {
        self.lock()
            .spawn_failures
            .push((pattern.to_string(), message.to_string()));
        self
    }

    /// Every command passed to `run`, in order
    pub fn calls(&self) -> Vec<String> {
        self.events(EventKind::Run)
    }

    /// Every command passed to `spawn`, in order
    pub fn spawned(&self) -> Vec<String> {
        self.events(EventKind::Spawn)
    }

    /// Number of `run` calls containing `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    /// Whether any `run` call contained `pattern`
    pub fn called(&self, pattern: &str) -> bool {
        self.count(pattern) > 0
    }

    fn events(&self, kind: EventKind) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.command.clone())
            .collect()
    }
}

impl ProcessExecutor for FakeExecutor {
    async fn run(&self, command: &CommandSpec) -> Result<CommandResult> {
        let rendered = command.to_string();
        let mut state = self.lock();

        let reply = state
            .select_rule(&rendered)
            .map(|index| state.rules[index].next_reply());

        state.log.push(Event {
            kind: EventKind::Run,
            command: rendered.clone(),
        });

        match reply {
            Some(Reply::Output(result)) => Ok(result),
            Some(Reply::Fail(message)) => Err(Error::process(message)),
            None => Ok(CommandResult::failed(
                127,
                format!("fake: no rule for `{}`", rendered),
            )),
        }
    }

    async fn spawn(&self, spec: &SpawnSpec) -> Result<ProcessHandle> {
        let rendered = spec.command.to_string();
        let mut state = self.lock();

        state.log.push(Event {
            kind: EventKind::Spawn,
            command: rendered.clone(),
        });

        if let Some((_, message)) = state
            .spawn_failures
            .iter()
            .find(|(pattern, _)| rendered.contains(pattern.as_str()))
        {
            return Err(Error::process_spawn(&rendered, message.clone()));
        }

        state.next_pid += 1;
        Ok(ProcessHandle::untracked(Some(state.next_pid), rendered))
    }
}

/// Tool availability with every tool resolved to its bare name
pub fn fake_tools() -> ToolAvailability {
    ToolAvailability {
        adb_path: Some("adb".to_string()),
        emulator_path: Some("emulator".to_string()),
        xcrun_simctl: true,
        appium_path: Some("appium".to_string()),
    }
}

/// Android environment for the given device kind
pub fn android_config(kind: DeviceKind, device_name: &str) -> EnvironmentConfig {
    EnvironmentConfig {
        platform: Platform::Android,
        device_kind: kind,
        platform_version: "14".to_string(),
        device_name: device_name.to_string(),
        environment: EnvironmentTag::Stage,
        app_id: "com.example.shop.stage".to_string(),
        app_activity: Some(".MainActivity".to_string()),
        reset: ResetFlags::default(),
        server_host: "127.0.0.1".to_string(),
        server_port: 4723,
    }
}

/// iOS simulator environment
pub fn ios_config(kind: DeviceKind, device_name: &str, version: &str) -> EnvironmentConfig {
    EnvironmentConfig {
        platform: Platform::IOS,
        device_kind: kind,
        platform_version: version.to_string(),
        device_name: device_name.to_string(),
        environment: EnvironmentTag::Stage,
        app_id: "com.example.shop.stage".to_string(),
        app_activity: None,
        reset: ResetFlags::default(),
        server_host: "127.0.0.1".to_string(),
        server_port: 4723,
    }
}
