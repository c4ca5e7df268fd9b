// Oasis Gate - Process Launcher
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Opens or focuses applications by walking an ordered chain of OS-level
// strategies. Every attempt is recorded; the chain fails only when
// exhausted. Command execution sits behind CommandRunner.

use crate::cache::TtlCache;
use crate::config::LauncherConfig;
use crate::error::{GateError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchAction {
    Open,
    Focus,
}

impl LaunchAction {
    fn as_str(&self) -> &'static str {
        match self {
            LaunchAction::Open => "open",
            LaunchAction::Focus => "focus",
        }
    }
}

/// One strategy tried during a launcher invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchAttempt {
    pub strategy: String,
    pub program: String,
    pub args: Vec<String>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl LaunchAttempt {
    fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last-resort diagnostic: stderr, then stdout, then exit code
    fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else if !stdout.is_empty() {
            stdout.to_string()
        } else if let Some(code) = self.exit_code {
            format!("exit code {}", code)
        } else {
            "no exit status".to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    pub target: String,
    pub action: LaunchAction,
    pub attempted: Vec<LaunchAttempt>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Other
        }
    }
}

// ============================================================================
// COMMAND RUNNER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing output
    async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput>;

    /// Spawn with null stdio and wait up to `settle`.
    /// `Ok(None)` means the process is still running.
    async fn spawn_detached(&self, program: &str, settle: Duration) -> io::Result<Option<i32>>;

    /// Whether `program` resolves on PATH
    fn locate(&self, program: &str) -> bool;
}

pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn spawn_detached(&self, program: &str, settle: Duration) -> io::Result<Option<i32>> {
        let mut child = Command::new(program)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        match tokio::time::timeout(settle, child.wait()).await {
            Ok(status) => Ok(Some(status?.code().unwrap_or(-1))),
            // Left running; tokio reaps it when it exits
            Err(_) => Ok(None),
        }
    }

    fn locate(&self, program: &str) -> bool {
        command_exists(program)
    }
}

fn command_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

// ============================================================================
// STRATEGIES
// ============================================================================

enum Strategy {
    /// Spawn the target itself, no arguments
    Direct,
    /// Run one helper program
    Helper { name: &'static str, program: &'static str, args: Vec<String> },
    /// `xdotool search --name` then `windowactivate` on the first id
    SearchActivate,
}

fn open_chain(platform: Platform, target: &str) -> Vec<Strategy> {
    let t = target.to_string();
    let mut chain = vec![Strategy::Direct];
    match platform {
        Platform::Linux | Platform::Other => {
            chain.push(Strategy::Helper { name: "desktop-launcher", program: "gtk-launch", args: vec![t.clone()] });
            chain.push(Strategy::Helper { name: "open-by-association", program: "xdg-open", args: vec![t] });
        }
        Platform::MacOs => {
            chain.push(Strategy::Helper { name: "desktop-launcher", program: "open", args: vec!["-a".into(), t.clone()] });
            chain.push(Strategy::Helper { name: "open-by-association", program: "open", args: vec![t] });
        }
        Platform::Windows => {
            chain.push(Strategy::Helper {
                name: "open-by-association",
                program: "cmd",
                args: vec!["/C".into(), "start".into(), String::new(), t],
            });
        }
    }
    chain
}

fn focus_chain(target: &str, hint_class: Option<&str>) -> Vec<Strategy> {
    let mut chain = Vec::new();
    if let Some(hint) = hint_class.filter(|h| !h.trim().is_empty()) {
        chain.push(Strategy::Helper {
            name: "activate-by-class",
            program: "wmctrl",
            args: vec!["-x".into(), "-a".into(), hint.to_string()],
        });
    }
    chain.push(Strategy::Helper {
        name: "activate-by-name",
        program: "wmctrl",
        args: vec!["-a".into(), target.to_string()],
    });
    chain.push(Strategy::SearchActivate);
    chain
}

// ============================================================================
// LAUNCHER
// ============================================================================

pub struct Launcher {
    runner: Arc<dyn CommandRunner>,
    platform: Platform,
    settle: Duration,
    helpers: TtlCache<String, bool>,
}

impl Launcher {
    pub fn new(config: &LauncherConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner), Platform::current())
    }

    pub fn with_runner(config: &LauncherConfig, runner: Arc<dyn CommandRunner>, platform: Platform) -> Self {
        Self {
            runner,
            platform,
            settle: Duration::from_millis(config.launch_settle_ms),
            helpers: TtlCache::new(
                Duration::from_secs(config.helper_cache_ttl_secs),
                config.helper_cache_capacity,
            ),
        }
    }

    pub async fn open(&self, target: &str) -> Result<LaunchReport> {
        let chain = open_chain(self.platform, target);
        self.walk(LaunchAction::Open, target, chain).await
    }

    pub async fn focus(&self, target: &str, hint_class: Option<&str>) -> Result<LaunchReport> {
        if self.platform != Platform::Linux {
            return Err(GateError::bad_request("focus is not supported on this platform"));
        }
        if !self.helper_available("wmctrl") && !self.helper_available("xdotool") {
            return Err(GateError::bad_request(
                "focus requires wmctrl or xdotool on PATH",
            ));
        }
        let chain = focus_chain(target, hint_class);
        self.walk(LaunchAction::Focus, target, chain).await
    }

    async fn walk(&self, action: LaunchAction, target: &str, chain: Vec<Strategy>) -> Result<LaunchReport> {
        let mut attempted: Vec<LaunchAttempt> = Vec::with_capacity(chain.len());

        for strategy in chain {
            let attempt = match strategy {
                Strategy::Direct => self.try_direct(target).await,
                Strategy::Helper { name, program, args } => self.try_helper(name, program, args).await,
                Strategy::SearchActivate => self.try_search_activate(target).await,
            };
            log::debug!(
                "{} {:?}: {} -> {:?}",
                action.as_str(), target, attempt.strategy, attempt.exit_code
            );
            let done = attempt.succeeded();
            attempted.push(attempt);
            if done {
                log::info!("{} {:?} succeeded after {} attempt(s)", action.as_str(), target, attempted.len());
                return Ok(LaunchReport {
                    target: target.to_string(),
                    action,
                    attempted,
                    timestamp: Utc::now().to_rfc3339(),
                });
            }
        }

        let diagnostic = attempted.last()
            .map(LaunchAttempt::diagnostic)
            .unwrap_or_else(|| "no strategies available".to_string());
        log::warn!("{} {:?} exhausted {} strategies: {}", action.as_str(), target, attempted.len(), diagnostic);

        Err(GateError::Internal {
            message: diagnostic,
            details: Some(serde_json::json!({
                "target": target,
                "action": action,
                "attempted": attempted,
            })),
        })
    }

    async fn try_direct(&self, target: &str) -> LaunchAttempt {
        let mut attempt = LaunchAttempt {
            strategy: "direct".to_string(),
            program: target.to_string(),
            args: Vec::new(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        match self.runner.spawn_detached(target, self.settle).await {
            // Still running after the settle window
            Ok(None) => attempt.exit_code = Some(0),
            Ok(Some(code)) => {
                attempt.exit_code = Some(code);
                if code != 0 {
                    attempt.stderr = format!("{} exited with code {}", target, code);
                }
            }
            Err(e) => attempt.stderr = format!("spawn {}: {}", target, e),
        }
        attempt
    }

    async fn try_helper(&self, name: &str, program: &str, args: Vec<String>) -> LaunchAttempt {
        let mut attempt = LaunchAttempt {
            strategy: name.to_string(),
            program: program.to_string(),
            args,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        if !self.helper_available(program) {
            attempt.stderr = format!("{} not found on PATH", program);
            return attempt;
        }
        match self.runner.run(program, &attempt.args).await {
            Ok(out) => {
                attempt.exit_code = out.exit_code;
                attempt.stdout = out.stdout;
                attempt.stderr = out.stderr;
            }
            Err(e) => attempt.stderr = format!("spawn {}: {}", program, e),
        }
        attempt
    }

    async fn try_search_activate(&self, target: &str) -> LaunchAttempt {
        let search_args = vec!["search".to_string(), "--name".to_string(), target.to_string()];
        let mut attempt = self.try_helper("search-and-activate", "xdotool", search_args).await;
        if !attempt.succeeded() {
            return attempt;
        }

        let window_id = match attempt.stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                attempt.exit_code = Some(1);
                attempt.stderr = format!("no window matching {:?}", target);
                return attempt;
            }
        };

        let activate = vec!["windowactivate".to_string(), window_id];
        attempt.args.extend(activate.iter().cloned());
        match self.runner.run("xdotool", &activate).await {
            Ok(out) => {
                attempt.exit_code = out.exit_code;
                attempt.stderr = out.stderr;
            }
            Err(e) => {
                attempt.exit_code = None;
                attempt.stderr = format!("spawn xdotool: {}", e);
            }
        }
        attempt
    }

    fn helper_available(&self, program: &str) -> bool {
        let key = program.to_string();
        if let Some(found) = self.helpers.get(&key) {
            return found;
        }
        let found = self.runner.locate(program);
        self.helpers.insert(key, found);
        found
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted runner: fixed outputs per program, records every call
    #[derive(Default)]
    struct ScriptedRunner {
        outputs: HashMap<String, CommandOutput>,
        direct_exit: Option<i32>,
        missing: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
        lookups: Mutex<usize>,
    }

    impl ScriptedRunner {
        fn output(mut self, program: &str, code: i32, stdout: &str, stderr: &str) -> Self {
            self.outputs.insert(program.to_string(), CommandOutput {
                exit_code: Some(code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            });
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(format!("{} {}", program, args.join(" ")));
            Ok(self.outputs.get(program).cloned().unwrap_or(CommandOutput {
                exit_code: Some(127),
                ..Default::default()
            }))
        }

        async fn spawn_detached(&self, program: &str, _settle: Duration) -> io::Result<Option<i32>> {
            self.calls.lock().unwrap().push(format!("spawn {}", program));
            Ok(self.direct_exit)
        }

        fn locate(&self, program: &str) -> bool {
            *self.lookups.lock().unwrap() += 1;
            !self.missing.contains(&program)
        }
    }

    fn launcher(runner: Arc<ScriptedRunner>, platform: Platform) -> Launcher {
        Launcher::with_runner(&LauncherConfig::default(), runner, platform)
    }

    #[cfg(unix)]
    #[test]
    fn helper_lookup_on_path() {
        assert!(command_exists("sh"));
        assert!(!command_exists("oasis-gate-no-such-helper"));
    }

    #[tokio::test]
    async fn open_exhaustion_reports_every_attempt() {
        let runner = Arc::new(ScriptedRunner {
            direct_exit: Some(1),
            ..Default::default()
        }
        .output("gtk-launch", 1, "", "no such desktop file")
        .output("xdg-open", 4, "", "xdg-open: no method available for opening 'nosuchapp'"));
        let l = launcher(runner.clone(), Platform::Linux);

        match l.open("nosuchapp").await {
            Err(GateError::Internal { message, details }) => {
                assert!(message.contains("no method available"));
                let attempted = &details.unwrap()["attempted"];
                assert_eq!(attempted.as_array().unwrap().len(), 3);
                assert_eq!(attempted[0]["strategy"], "direct");
                assert_eq!(attempted[2]["exitCode"], 4);
            }
            other => panic!("expected INTERNAL_ERROR, got {:?}", other),
        }
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn first_success_stops_the_chain() {
        let runner = Arc::new(ScriptedRunner {
            direct_exit: Some(2),
            ..Default::default()
        }
        .output("gtk-launch", 0, "", ""));
        let l = launcher(runner.clone(), Platform::Linux);

        let report = l.open("firefox").await.unwrap();
        assert_eq!(report.attempted.len(), 2);
        assert_eq!(report.attempted[1].program, "gtk-launch");
        assert!(!runner.calls().iter().any(|c| c.starts_with("xdg-open")));
        assert!(chrono::DateTime::parse_from_rfc3339(&report.timestamp).is_ok());
    }

    #[tokio::test]
    async fn still_running_direct_spawn_counts_as_launched() {
        let runner = Arc::new(ScriptedRunner { direct_exit: None, ..Default::default() });
        let report = launcher(runner, Platform::Linux).open("gedit").await.unwrap();
        assert_eq!(report.attempted.len(), 1);
        assert_eq!(report.attempted[0].exit_code, Some(0));
    }

    #[tokio::test]
    async fn missing_helper_is_a_failed_attempt() {
        let runner = Arc::new(ScriptedRunner {
            direct_exit: Some(1),
            missing: vec!["gtk-launch"],
            ..Default::default()
        }
        .output("xdg-open", 3, "", "boom"));
        let err = launcher(runner.clone(), Platform::Linux).open("x").await.unwrap_err();

        let details = match err {
            GateError::Internal { details, .. } => details.unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        let attempted = details["attempted"].as_array().unwrap();
        assert_eq!(attempted.len(), 3);
        assert!(attempted[1]["exitCode"].is_null());
        assert!(attempted[1]["stderr"].as_str().unwrap().contains("not found"));
        assert!(!runner.calls().iter().any(|c| c.starts_with("gtk-launch")));
    }

    #[tokio::test]
    async fn focus_tries_class_hint_first() {
        let runner = Arc::new(ScriptedRunner::default()
            .output("wmctrl", 1, "", "")
            .output("xdotool", 0, "4194307\n4194311\n", ""));
        let report = launcher(runner.clone(), Platform::Linux)
            .focus("Terminal", Some("gnome-terminal"))
            .await
            .unwrap();

        assert_eq!(report.attempted.len(), 3);
        assert_eq!(report.attempted[0].args, vec!["-x", "-a", "gnome-terminal"]);
        assert_eq!(report.attempted[1].args, vec!["-a", "Terminal"]);
        assert!(runner.calls().contains(&"xdotool windowactivate 4194307".to_string()));
    }

    #[tokio::test]
    async fn focus_exhaustion_counts_search_activate_once() {
        let runner = Arc::new(ScriptedRunner::default()
            .output("wmctrl", 1, "", "")
            .output("xdotool", 1, "", ""));
        let err = launcher(runner, Platform::Linux).focus("Nothing", None).await.unwrap_err();
        match err {
            GateError::Internal { message, details } => {
                assert_eq!(message, "exit code 1");
                assert_eq!(details.unwrap()["attempted"].as_array().unwrap().len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn focus_refused_without_window_tooling() {
        let runner = Arc::new(ScriptedRunner::default());
        let err = launcher(runner.clone(), Platform::MacOs).focus("Safari", None).await.unwrap_err();
        assert!(matches!(err, GateError::BadRequest { .. }));

        let bare = Arc::new(ScriptedRunner { missing: vec!["wmctrl", "xdotool"], ..Default::default() });
        let err = launcher(bare.clone(), Platform::Linux).focus("x", None).await.unwrap_err();
        assert!(matches!(err, GateError::BadRequest { .. }));
        assert!(runner.calls().is_empty());
        assert!(bare.calls().is_empty());
    }

    #[tokio::test]
    async fn helper_lookups_are_cached() {
        let runner = Arc::new(ScriptedRunner { direct_exit: Some(1), ..Default::default() });
        let l = launcher(runner.clone(), Platform::Linux);
        let _ = l.open("a").await;
        let _ = l.open("b").await;
        assert_eq!(*runner.lookups.lock().unwrap(), 2);
    }
}
