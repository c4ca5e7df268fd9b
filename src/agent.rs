// Oasis Gate - Action-Loop Agent
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Bounded observe -> propose -> execute loop toward a natural-language goal.
// The reasoning collaborator only ever proposes; every proposal is parsed
// against a closed vocabulary before anything is dispatched.

use crate::error::{ErrorPayload, GateError, Result};
use crate::launcher::Launcher;
use crate::validate::validate_command;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// PROPOSALS
// ============================================================================

fn default_button() -> u8 {
    1
}

/// One step's action, tagged `{type, params}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "lowercase")]
pub enum ActionProposal {
    Click {
        x: i32,
        y: i32,
        #[serde(default = "default_button")]
        button: u8,
    },
    Type {
        text: String,
    },
    Key {
        keys: String,
    },
    Wait {
        ms: u64,
    },
    Move {
        x: i32,
        y: i32,
    },
    Focus {
        target: String,
        #[serde(default, rename = "hintClass", skip_serializing_if = "Option::is_none")]
        hint_class: Option<String>,
    },
    Run {
        command: String,
    },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

impl ActionProposal {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionProposal::Click { .. } => "click",
            ActionProposal::Type { .. } => "type",
            ActionProposal::Key { .. } => "key",
            ActionProposal::Wait { .. } => "wait",
            ActionProposal::Move { .. } => "move",
            ActionProposal::Focus { .. } => "focus",
            ActionProposal::Run { .. } => "run",
            ActionProposal::Done { .. } => "done",
        }
    }
}

/// First balanced `{...}` in `text`, string- and escape-aware.
/// An opening brace that never closes is skipped and the scan restarts
/// at the next one.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let mut from = 0usize;
    while let Some(pos) = text[from..].find('{') {
        let start = from + pos;
        if let Some(len) = balanced_len(&text[start..]) {
            return Some(&text[start..start + len]);
        }
        from = start + 1;
    }
    None
}

/// Byte length of the balanced object opening at `text[0]`, if it closes
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse raw model text into exactly one proposal
pub fn parse_proposal(raw: &str) -> Result<ActionProposal> {
    let block = extract_first_json_object(raw)
        .ok_or_else(|| GateError::ModelOutputInvalid("no JSON object in model output".to_string()))?;
    let value: Value = serde_json::from_str(block)
        .map_err(|e| GateError::ModelOutputInvalid(format!("unparseable JSON: {}", e)))?;

    let kind = value.get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| GateError::ModelOutputInvalid("missing string field \"type\"".to_string()))?;
    let params = match value.get("params") {
        None | Some(Value::Null) => json!({}),
        Some(p @ Value::Object(_)) => p.clone(),
        Some(_) => {
            return Err(GateError::ModelOutputInvalid("\"params\" must be an object".to_string()));
        }
    };

    serde_json::from_value(json!({ "type": kind, "params": params }))
        .map_err(|e| GateError::ModelOutputInvalid(format!("invalid {} proposal: {}", kind, e)))
}

// ============================================================================
// COLLABORATORS
// ============================================================================

/// A captured screen image
#[derive(Debug, Clone)]
pub struct Observation {
    pub mime_type: String,
    pub data: Vec<u8>,
    /// Short text form kept in the transcript instead of the image
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub image: Option<Observation>,
}

#[async_trait]
pub trait ObservationProvider: Send + Sync {
    async fn capture(&self) -> Result<Observation>;
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Raw model text; parsing happens in the loop
    async fn propose(&self, prompt: &Prompt) -> Result<String>;
}

#[async_trait]
pub trait InputExecutor: Send + Sync {
    async fn perform(&self, action: &ActionProposal) -> Result<Value>;
}

// ============================================================================
// SESSION TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Done,
    BudgetExceeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StepOutcome {
    Executed { result: Value },
    /// Dry-run: recorded, never dispatched
    Skipped,
    Done,
    Failed { error: ErrorPayload },
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub observation: String,
    pub proposal: Option<ActionProposal>,
    pub outcome: StepOutcome,
}

/// Owned by one invocation; never persisted or resumed
#[derive(Debug, Clone)]
pub struct AgentSession {
    pub goal: String,
    pub dry_run: bool,
    pub step_budget: usize,
    pub transcript: Vec<StepRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub status: SessionStatus,
    pub transcript: Vec<StepRecord>,
    pub steps_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl AgentSession {
    pub fn new(goal: impl Into<String>, dry_run: bool, step_budget: usize) -> Self {
        Self {
            goal: goal.into(),
            dry_run,
            step_budget,
            transcript: Vec::new(),
        }
    }

    fn finish(self, status: SessionStatus, reason: Option<String>, error: Option<ErrorPayload>) -> SessionResult {
        SessionResult {
            status,
            steps_used: self.transcript.len(),
            transcript: self.transcript,
            reason,
            error,
        }
    }

    fn fail(mut self, step: usize, observation: String, proposal: Option<ActionProposal>, err: GateError) -> SessionResult {
        let payload = err.payload();
        log::warn!("Session step {} failed: {} {}", step, payload.kind.as_str(), payload.message);
        self.transcript.push(StepRecord {
            step,
            observation,
            proposal,
            outcome: StepOutcome::Failed { error: payload.clone() },
        });
        let reason = Some(payload.message.clone());
        self.finish(SessionStatus::Failed, reason, Some(payload))
    }
}

// ============================================================================
// PROMPT
// ============================================================================

const SYSTEM_PROMPT: &str = "You operate a desktop computer to accomplish the user's goal. \
You see a screenshot of the current screen each step. \
Reply with exactly one JSON object of the form {\"type\": <action>, \"params\": {...}} and nothing else. \
Actions: \
click {\"x\": int, \"y\": int, \"button\": 1|2|3}; \
type {\"text\": string}; \
key {\"keys\": string, e.g. \"ctrl+l\" or \"Return\"}; \
wait {\"ms\": int}; \
move {\"x\": int, \"y\": int}; \
focus {\"target\": window name, \"hintClass\": optional window class}; \
run {\"command\": shell command}; \
done {\"summary\": string} once the goal is accomplished or impossible.";

pub fn build_prompt(session: &AgentSession, observation: &Observation) -> Prompt {
    let mut user = format!(
        "Goal: {}\nStep {} of {}.\n",
        session.goal,
        session.transcript.len() + 1,
        session.step_budget
    );
    if session.transcript.is_empty() {
        user.push_str("No previous steps.\n");
    } else {
        user.push_str("Previous steps:\n");
        for record in &session.transcript {
            let proposal = record.proposal.as_ref()
                .and_then(|p| serde_json::to_string(p).ok())
                .unwrap_or_else(|| "(none)".to_string());
            let outcome = match &record.outcome {
                StepOutcome::Executed { result } => format!("ok {}", result),
                StepOutcome::Skipped => "not executed (dry run)".to_string(),
                StepOutcome::Done => "done".to_string(),
                StepOutcome::Failed { error } => format!("failed: {}", error.message),
            };
            user.push_str(&format!("{}. {} -> {}\n", record.step, proposal, outcome));
        }
    }
    user.push_str(&format!("Current screen: {}\n", observation.summary));

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
        image: Some(observation.clone()),
    }
}

// ============================================================================
// ACTION LOOP
// ============================================================================

pub struct ActionLoop {
    observer: Arc<dyn ObservationProvider>,
    reasoner: Arc<dyn ReasoningService>,
    executor: Arc<dyn InputExecutor>,
    launcher: Arc<Launcher>,
}

impl ActionLoop {
    pub fn new(
        observer: Arc<dyn ObservationProvider>,
        reasoner: Arc<dyn ReasoningService>,
        executor: Arc<dyn InputExecutor>,
        launcher: Arc<Launcher>,
    ) -> Self {
        Self { observer, reasoner, executor, launcher }
    }

    pub async fn run(&self, mut session: AgentSession, cancel: &CancellationToken) -> SessionResult {
        log::info!(
            "Session start: goal={:?} budget={} dry_run={}",
            truncate(&session.goal, 80), session.step_budget, session.dry_run
        );

        let mut step = 0usize;
        while step < session.step_budget {
            if cancel.is_cancelled() {
                log::info!("Session cancelled before step {}", step + 1);
                return session.finish(SessionStatus::Failed, Some("cancelled".to_string()), None);
            }
            let index = step + 1;

            let observation = match self.observer.capture().await {
                Ok(o) => o,
                Err(e) => return session.fail(index, "capture failed".to_string(), None, e),
            };
            let summary = observation.summary.clone();

            let prompt = build_prompt(&session, &observation);
            let raw = match self.reasoner.propose(&prompt).await {
                Ok(r) => r,
                Err(e) => return session.fail(index, summary, None, e),
            };
            let proposal = match parse_proposal(&raw) {
                Ok(p) => p,
                Err(e) => {
                    log::debug!("Unparseable model output: {:?}", truncate(&raw, 200));
                    return session.fail(index, summary, None, e);
                }
            };
            log::debug!("Step {}: proposed {}", index, proposal.kind());

            if let ActionProposal::Done { summary: done_summary } = &proposal {
                let reason = done_summary.clone();
                session.transcript.push(StepRecord {
                    step: index,
                    observation: summary,
                    proposal: Some(proposal),
                    outcome: StepOutcome::Done,
                });
                log::info!("Session done after {} step(s)", index);
                return session.finish(SessionStatus::Done, reason, None);
            }

            let outcome = if session.dry_run {
                StepOutcome::Skipped
            } else {
                let dispatched = self.dispatch(&proposal).await;
                match dispatched {
                    Ok(result) => StepOutcome::Executed { result },
                    Err(e) => return session.fail(index, summary, Some(proposal), e),
                }
            };
            session.transcript.push(StepRecord {
                step: index,
                observation: summary,
                proposal: Some(proposal),
                outcome,
            });
            step += 1;
        }

        log::info!("Session exhausted budget of {} step(s)", session.step_budget);
        let reason = Some(format!("step budget of {} exhausted", session.step_budget));
        session.finish(SessionStatus::BudgetExceeded, reason, None)
    }

    async fn dispatch(&self, proposal: &ActionProposal) -> Result<Value> {
        match proposal {
            ActionProposal::Focus { target, hint_class } => {
                let report = self.launcher.focus(target, hint_class.as_deref()).await?;
                serde_json::to_value(report).map_err(|e| GateError::internal(e.to_string()))
            }
            ActionProposal::Run { command } => {
                let screened = validate_command(command);
                if !screened.valid {
                    return Err(GateError::bad_request(format!(
                        "command refused: {}",
                        screened.errors.join("; ")
                    )));
                }
                for warning in &screened.warnings {
                    log::warn!("run: {}", warning);
                }
                self.executor.perform(proposal).await
            }
            ActionProposal::Done { .. } => Ok(Value::Null),
            _ => self.executor.perform(proposal).await,
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

// ============================================================================
// TESTS
// ============================================================================
