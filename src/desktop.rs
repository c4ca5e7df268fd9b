// Oasis Gate - Desktop Collaborators
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Concrete observation provider and input executor for the action loop.
// Screen capture: grim (Wayland) or ImageMagick import (X11).
// Input: xdotool. `wait` is a capped sleep, `run` is `sh -c` with a timeout.

use crate::agent::{ActionProposal, InputExecutor, Observation, ObservationProvider};
use crate::config::AgentConfig;
use crate::error::{GateError, Result};
use crate::launcher::{CommandRunner, SystemRunner};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

const MAX_RUN_OUTPUT: usize = 8 * 1024;

// ============================================================================
// SCREEN CAPTURE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotBackend {
    Grim,
    Import,
}

impl ScreenshotBackend {
    fn command(&self) -> (&'static str, Vec<&'static str>) {
        match self {
            ScreenshotBackend::Grim => ("grim", vec!["-t", "png", "-"]),
            ScreenshotBackend::Import => ("import", vec!["-window", "root", "png:-"]),
        }
    }
}

pub struct ScreenCapture {
    backend: Option<ScreenshotBackend>,
}

impl ScreenCapture {
    /// Pick whichever capture tool is installed; Wayland first
    pub fn detect() -> Self {
        let runner = SystemRunner;
        let backend = if runner.locate("grim") {
            Some(ScreenshotBackend::Grim)
        } else if runner.locate("import") {
            Some(ScreenshotBackend::Import)
        } else {
            None
        };
        match backend {
            Some(b) => log::info!("Screen capture backend: {:?}", b),
            None => log::warn!("No screen capture tool found (install grim or ImageMagick)"),
        }
        Self { backend }
    }
}

#[async_trait]
impl ObservationProvider for ScreenCapture {
    async fn capture(&self) -> Result<Observation> {
        let backend = self.backend.ok_or_else(|| {
            GateError::internal("screen capture requires either 'grim' (Wayland) or 'import' (ImageMagick/X11)")
        })?;
        let (program, args) = backend.command();

        let output = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| GateError::internal(format!("spawn {}: {}", program, e)))?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(GateError::internal(format!(
                "{} failed: {}",
                program,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let summary = match png_dimensions(&output.stdout) {
            Some((w, h)) => format!("screenshot {}x{} ({} bytes)", w, h, output.stdout.len()),
            None => format!("screenshot ({} bytes)", output.stdout.len()),
        };
        Ok(Observation {
            mime_type: "image/png".to_string(),
            data: output.stdout,
            summary,
        })
    }
}

/// Width and height from a PNG IHDR chunk
fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    if data.len() < 24 || &data[..8] != SIGNATURE || &data[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
    Some((width, height))
}

// ============================================================================
// INPUT EXECUTOR
// ============================================================================

pub struct XdoInput {
    runner: Arc<dyn CommandRunner>,
    max_wait: Duration,
    run_timeout: Duration,
}

impl XdoInput {
    pub fn new(config: &AgentConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    pub fn with_runner(config: &AgentConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            max_wait: Duration::from_millis(config.max_wait_ms),
            run_timeout: Duration::from_secs(config.run_timeout_secs),
        }
    }

    async fn xdotool(&self, args: Vec<String>) -> Result<Value> {
        let out = self.runner.run("xdotool", &args).await
            .map_err(|e| GateError::internal(format!("spawn xdotool: {}", e)))?;
        if out.exit_code != Some(0) {
            let stderr = out.stderr.trim();
            return Err(GateError::internal(if stderr.is_empty() {
                format!("xdotool {} failed with {:?}", args.first().map(String::as_str).unwrap_or(""), out.exit_code)
            } else {
                format!("xdotool: {}", stderr)
            }));
        }
        Ok(json!({ "program": "xdotool", "args": args }))
    }

    async fn shell(&self, command: &str) -> Result<Value> {
        let args = vec!["-c".to_string(), command.to_string()];
        let out = tokio::time::timeout(self.run_timeout, self.runner.run("sh", &args))
            .await
            .map_err(|_| GateError::internal(format!(
                "command timed out after {}s",
                self.run_timeout.as_secs()
            )))?
            .map_err(|e| GateError::internal(format!("spawn sh: {}", e)))?;

        Ok(json!({
            "exitCode": out.exit_code,
            "stdout": clip(&out.stdout),
            "stderr": clip(&out.stderr),
        }))
    }
}

#[async_trait]
impl InputExecutor for XdoInput {
    async fn perform(&self, action: &ActionProposal) -> Result<Value> {
        match action {
            ActionProposal::Click { x, y, button } => {
                self.xdotool(vec![
                    "mousemove".into(), x.to_string(), y.to_string(),
                    "click".into(), button.to_string(),
                ]).await
            }
            ActionProposal::Move { x, y } => {
                self.xdotool(vec!["mousemove".into(), x.to_string(), y.to_string()]).await
            }
            ActionProposal::Type { text } => {
                self.xdotool(vec!["type".into(), "--delay".into(), "12".into(), "--".into(), text.clone()]).await
            }
            ActionProposal::Key { keys } => {
                let mut args = vec!["key".to_string(), "--".to_string()];
                args.extend(keys.split_whitespace().map(str::to_string));
                if args.len() == 2 {
                    return Err(GateError::bad_request("key proposal has no keys"));
                }
                self.xdotool(args).await
            }
            ActionProposal::Wait { ms } => {
                let wait = Duration::from_millis(*ms).min(self.max_wait);
                tokio::time::sleep(wait).await;
                Ok(json!({ "waitedMs": wait.as_millis() as u64 }))
            }
            ActionProposal::Run { command } => self.shell(command).await,
            ActionProposal::Focus { .. } | ActionProposal::Done { .. } => Err(GateError::bad_request(
                format!("{} is not an input action", action.kind()),
            )),
        }
    }
}

fn clip(s: &str) -> String {
    if s.len() <= MAX_RUN_OUTPUT {
        return s.to_string();
    }
    let mut end = MAX_RUN_OUTPUT;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated {} bytes]", &s[..end], s.len() - end)
}

// ============================================================================
// TESTS
// ============================================================================
