// Oasis Gate - MCP Server (JSON-RPC 2.0 over stdio)
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// ALL tool calls route through this gateway: rate gate -> registry.
// Each tools/call runs on its own task; one writer task owns stdout.
// notifications/cancelled cancels the matching in-flight call.

use crate::error::{GateError, Result};
use crate::gate::RateLimiter;
use crate::tools::{CallContext, Registry};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "oasis-gate";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Summarize tool params for the audit log (truncate large values)
fn param_summary(name: &str, args: &Value) -> String {
    let field = |key: &str| args.get(key).and_then(|v| v.as_str()).unwrap_or("?");
    match name {
        "fs_write" => {
            let size = args.get("content").and_then(|v| v.as_str()).map(|s| s.len()).unwrap_or(0);
            format!("path={} content_len={}", field("path"), size)
        }
        "fs_move" => format!("from={} to={}", field("from"), field("to")),
        "fs_find" => format!("root={} query={}", field("rootDir"), field("query")),
        "fs_complete" => format!("input={}", field("input")),
        n if n.starts_with("fs_") => format!("path={}", field("path")),
        "open_app" => {
            let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("open");
            format!("{} target={}", action, field("target"))
        }
        "do_anything" => {
            let goal = field("goal");
            let goal: String = goal.chars().take(150).collect();
            let dry = args.get("dryRun").and_then(|v| v.as_bool()).unwrap_or(false);
            format!("goal={} dry_run={} max_steps={}", goal, dry, args.get("maxSteps").unwrap_or(&Value::Null))
        }
        _ => {
            let s = args.to_string();
            if s.chars().count() > 300 {
                format!("{}…", s.chars().take(300).collect::<String>())
            } else {
                s
            }
        }
    }
}

fn response(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

/// tools/call result body. Tool failures are results with isError set.
pub fn call_result(outcome: &Result<Value>) -> Value {
    match outcome {
        Ok(value) => json!({
            "content": [{
                "type": "text",
                "text": serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            }],
            "structuredContent": value,
            "isError": false,
        }),
        Err(err) => {
            let payload = err.payload();
            json!({
                "content": [{
                    "type": "text",
                    "text": format!("{}: {}", payload.kind.as_str(), payload.message),
                }],
                "structuredContent": { "error": payload },
                "isError": true,
            })
        }
    }
}

// ============================================================================
// SERVER
// ============================================================================

pub struct Server {
    registry: Registry,
    limiter: RateLimiter,
    inflight: Mutex<HashMap<String, CancellationToken>>,
}

impl Server {
    pub fn new(registry: Registry, limiter: RateLimiter) -> Self {
        Self {
            registry,
            limiter,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Rate gate then registry. Used by the stdio loop and the one-shot CLI.
    pub async fn call(&self, name: &str, args: &Value, ctx: &CallContext) -> Result<Value> {
        log::info!(target: "audit", "CALL {} | {}", name, param_summary(name, args));

        let outcome = match self.registry.get(name) {
            None => Err(GateError::NotFound(format!("unknown tool: {}", name))),
            Some(tool) => match self.limiter.admit(tool.id.category()) {
                Ok(()) => self.registry.invoke(name, args, ctx).await,
                Err(e) => Err(e),
            },
        };

        match &outcome {
            Err(e) => log::warn!(target: "audit", "FAIL {} | {} {}", name, e.kind().as_str(), e),
            Ok(v) if v.get("status").and_then(Value::as_str) == Some("failed") => {
                log::warn!(target: "audit", "FAIL {} | session failed", name);
            }
            Ok(_) => {}
        }
        outcome
    }

    fn track(&self, key: String, token: CancellationToken) {
        self.lock_inflight().insert(key, token);
    }

    fn untrack(&self, key: &str) {
        self.lock_inflight().remove(key);
    }

    fn cancel(&self, key: &str) -> bool {
        match self.lock_inflight().get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn lock_inflight(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle one decoded message. Responses go through `out`.
    pub fn handle(self: &Arc<Self>, msg: Value, out: &UnboundedSender<Value>) {
        let method = msg["method"].as_str().unwrap_or("").to_string();
        let id = msg.get("id").cloned().unwrap_or(Value::Null);
        let params = msg.get("params").cloned().unwrap_or(Value::Null);

        log::debug!("Received: {}", method);

        let reply = |value: Value| {
            if out.send(value).is_err() {
                log::warn!("Writer closed, dropping response");
            }
        };

        match method.as_str() {
            "initialize" => {
                reply(response(&id, json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": SERVER_VERSION,
                    }
                })));
            }

            "notifications/initialized" => {
                // No response needed
            }

            "tools/list" => {
                reply(response(&id, json!({ "tools": self.registry.definitions() })));
            }

            "tools/call" => {
                let name = params["name"].as_str().unwrap_or("").to_string();
                let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                let key = id.to_string();
                let ctx = CallContext::default();
                self.track(key.clone(), ctx.cancel.clone());

                let server = Arc::clone(self);
                let out = out.clone();
                tokio::spawn(async move {
                    let outcome = server.call(&name, &args, &ctx).await;
                    server.untrack(&key);
                    if out.send(response(&id, call_result(&outcome))).is_err() {
                        log::warn!("Writer closed before {} finished", name);
                    }
                });
            }

            "notifications/cancelled" => {
                let key = params.get("requestId").map(Value::to_string).unwrap_or_default();
                if self.cancel(&key) {
                    log::info!("Cancelled request {}", key);
                } else {
                    log::debug!("Cancel for unknown request {}", key);
                }
            }

            "ping" => {
                reply(response(&id, json!({})));
            }

            _ => {
                if !id.is_null() {
                    reply(error_response(&id, -32601, &format!("Unknown method: {}", method)));
                }
            }
        }
    }
}

/// Serve until stdin closes, then drain in-flight calls.
pub async fn run(server: Server) -> anyhow::Result<()> {
    log::info!("Starting {} v{}", SERVER_NAME, SERVER_VERSION);
    let server = Arc::new(server);
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = rx.recv().await {
            let line = match serde_json::to_string(&msg) {
                Ok(l) => l,
                Err(e) => {
                    log::error!("Response serialization failed: {}", e);
                    continue;
                }
            };
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                log::error!("stdin read error: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(line) {
            Ok(msg) => server.handle(msg, &tx),
            Err(e) => {
                log::warn!("JSON parse error: {}", e);
                let _ = tx.send(error_response(&Value::Null, -32700, "Parse error"));
            }
        }
    }

    log::info!("stdin closed, draining in-flight calls");
    drop(tx);
    writer.await??;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FsConfig, LauncherConfig, RateLimitConfig};
    use crate::fs::Sandbox;
    use crate::launcher::Launcher;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn server(dir: &tempfile::TempDir, limits: RateLimitConfig) -> Arc<Server> {
        let root = dir.path().to_string_lossy().to_string();
        let sandbox = Arc::new(Sandbox::new(&[root], FsConfig::default()).unwrap());
        let launcher = Arc::new(Launcher::new(&LauncherConfig::default()));
        let registry = Registry::new(sandbox, launcher, None, 5).unwrap();
        Arc::new(Server::new(registry, RateLimiter::new(&limits)))
    }

    async fn next(rx: &mut UnboundedReceiver<Value>) -> Value {
        rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn lists_tools_and_answers_ping() {
        let dir = tempfile::tempdir().unwrap();
        let srv = server(&dir, RateLimitConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        srv.handle(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}), &tx);
        assert_eq!(next(&mut rx).await["result"]["serverInfo"]["name"], SERVER_NAME);

        srv.handle(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}), &tx);
        srv.handle(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}), &tx);
        let tools = next(&mut rx).await;
        assert_eq!(tools["id"], 2);
        assert_eq!(tools["result"]["tools"].as_array().unwrap().len(), 11);

        srv.handle(json!({"jsonrpc": "2.0", "id": 3, "method": "ping"}), &tx);
        assert_eq!(next(&mut rx).await["id"], 3);

        srv.handle(json!({"jsonrpc": "2.0", "id": 4, "method": "resources/list"}), &tx);
        assert_eq!(next(&mut rx).await["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn tool_errors_are_results_with_kind() {
        let dir = tempfile::tempdir().unwrap();
        let srv = server(&dir, RateLimitConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        srv.handle(json!({
            "jsonrpc": "2.0", "id": "a", "method": "tools/call",
            "params": {"name": "fs_read", "arguments": {"path": "/definitely/outside"}}
        }), &tx);
        let msg = next(&mut rx).await;
        assert_eq!(msg["id"], "a");
        assert_eq!(msg["result"]["isError"], true);
        assert_eq!(msg["result"]["structuredContent"]["error"]["kind"], "BAD_REQUEST");

        srv.handle(json!({
            "jsonrpc": "2.0", "id": "b", "method": "tools/call",
            "params": {"name": "nope", "arguments": {}}
        }), &tx);
        assert_eq!(next(&mut rx).await["result"]["structuredContent"]["error"]["kind"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn rate_gate_sits_in_front_of_registry() {
        let dir = tempfile::tempdir().unwrap();
        let srv = server(&dir, RateLimitConfig { reads_per_minute: 1, ..Default::default() });
        let args = json!({"path": dir.path().to_string_lossy()});
        let ctx = CallContext::default();

        srv.call("fs_exists", &args, &ctx).await.unwrap();
        let err = srv.call("fs_exists", &args, &ctx).await.unwrap_err();
        let payload = err.payload();
        assert_eq!(payload.kind.as_str(), "RATE_LIMIT");
        assert!(payload.retry_after.unwrap() >= 1);
    }

    #[test]
    fn cancel_hits_tracked_token() {
        let dir = tempfile::tempdir().unwrap();
        let srv = server(&dir, RateLimitConfig::default());
        let token = CancellationToken::new();
        srv.track(json!(7).to_string(), token.clone());
        assert!(srv.cancel(&json!(7).to_string()));
        assert!(token.is_cancelled());
        assert!(!srv.cancel("8"));
    }

    #[test]
    fn summaries_truncate_goals() {
        let goal = "x".repeat(500);
        let s = param_summary("do_anything", &json!({"goal": goal, "maxSteps": 3}));
        assert!(s.len() < 220);
        assert!(s.contains("max_steps=3"));
    }
}
