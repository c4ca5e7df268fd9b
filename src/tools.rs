// Oasis Gate - Tool Registry
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Fixed catalogue of tools, built once at startup.
// Every call: look up -> validate against compiled schema -> typed request
// -> handler. Nothing past validation touches untyped arguments.

use crate::agent::{ActionLoop, AgentSession};
use crate::error::{GateError, Result};
use crate::fs::{ContentEncoding, FindOptions, Sandbox};
use crate::gate::Category;
use crate::launcher::{LaunchAction, Launcher};
use crate::validate::Schema;
use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const MAX_AGENT_STEPS: i64 = 50;

// ============================================================================
// TOOL IDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolId {
    FsExists,
    FsStat,
    FsDir,
    FsRead,
    FsWrite,
    FsMkdir,
    FsMove,
    FsDelete,
    FsFind,
    FsComplete,
    OpenApp,
    DoAnything,
}

impl ToolId {
    pub const ALL: [ToolId; 12] = [
        ToolId::FsExists,
        ToolId::FsStat,
        ToolId::FsDir,
        ToolId::FsRead,
        ToolId::FsWrite,
        ToolId::FsMkdir,
        ToolId::FsMove,
        ToolId::FsDelete,
        ToolId::FsFind,
        ToolId::FsComplete,
        ToolId::OpenApp,
        ToolId::DoAnything,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolId::FsExists => "fs_exists",
            ToolId::FsStat => "fs_stat",
            ToolId::FsDir => "fs_dir",
            ToolId::FsRead => "fs_read",
            ToolId::FsWrite => "fs_write",
            ToolId::FsMkdir => "fs_mkdir",
            ToolId::FsMove => "fs_move",
            ToolId::FsDelete => "fs_delete",
            ToolId::FsFind => "fs_find",
            ToolId::FsComplete => "fs_complete",
            ToolId::OpenApp => "open_app",
            ToolId::DoAnything => "do_anything",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            ToolId::FsWrite | ToolId::FsMkdir | ToolId::FsMove | ToolId::FsDelete | ToolId::OpenApp => {
                Category::Mutation
            }
            ToolId::DoAnything => Category::Agent,
            _ => Category::Read,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ToolId::FsExists => "Check whether a path exists inside the allowed roots and report its type.",
            ToolId::FsStat => "Get size, modification time and type of a file or directory.",
            ToolId::FsDir => "List a directory, sorted by name. Dotfiles are hidden unless includeHidden is set.",
            ToolId::FsRead => "Read a file. Returns UTF-8 text, or base64 when the content is binary.",
            ToolId::FsWrite => "Write a file. The parent directory must already exist.",
            ToolId::FsMkdir => "Create a directory. With recursive, missing parents are created too.",
            ToolId::FsMove => "Move or rename a file or directory. Both ends must be inside the allowed roots.",
            ToolId::FsDelete => "Delete a file, or a directory (recursive required when it is not empty).",
            ToolId::FsFind => "Search for entries by name under a directory: case-insensitive substring, or a glob when the query has *, ?, [..] or {a,b}.",
            ToolId::FsComplete => "Complete a partially typed path.",
            ToolId::OpenApp => "Open an application or file, or focus an existing window.",
            ToolId::DoAnything => "Accomplish a goal on the desktop through a bounded observe/act loop. Use dryRun to preview proposed actions.",
        }
    }

    fn input_schema(&self) -> Value {
        let path = json!({"type": "string", "minLength": 1, "maxLength": 4096, "description": "File or directory path; ~ and relative paths allowed"});
        let cwd = json!({"type": "string", "minLength": 1, "maxLength": 4096, "description": "Absolute base for relative paths"});
        let flag = |desc: &str| json!({"type": "boolean", "default": false, "description": desc});

        let (properties, required) = match self {
            ToolId::FsExists | ToolId::FsStat | ToolId::FsRead => (
                json!({"path": path, "cwd": cwd}),
                vec!["path"],
            ),
            ToolId::FsDir => (
                json!({"path": path, "cwd": cwd, "includeHidden": flag("Include dotfiles")}),
                vec!["path"],
            ),
            ToolId::FsWrite => (
                json!({
                    "path": path,
                    "cwd": cwd,
                    "content": {"type": "string", "description": "File content"},
                    "encoding": {"type": "string", "enum": ["utf8", "base64"], "default": "utf8"},
                }),
                vec!["path", "content"],
            ),
            ToolId::FsMkdir => (
                json!({"path": path, "cwd": cwd, "recursive": flag("Create missing parents")}),
                vec!["path"],
            ),
            ToolId::FsMove => (
                json!({"from": path.clone(), "to": path, "cwd": cwd, "overwrite": flag("Replace an existing destination")}),
                vec!["from", "to"],
            ),
            ToolId::FsDelete => (
                json!({"path": path, "cwd": cwd, "recursive": flag("Delete non-empty directories")}),
                vec!["path"],
            ),
            ToolId::FsFind => (
                json!({
                    "rootDir": path,
                    "cwd": cwd,
                    "query": {"type": "string", "minLength": 1, "maxLength": 256},
                    "maxResults": {"type": "integer", "minimum": 1, "maximum": 10000},
                    "includeHidden": flag("Include dotfiles and dot-directories"),
                    "exclude": {
                        "type": "array",
                        "items": {"type": "string", "minLength": 1, "maxLength": 255},
                        "maxItems": 64,
                        "description": "Extra directory names to skip",
                    },
                }),
                vec!["rootDir", "query"],
            ),
            ToolId::FsComplete => (
                json!({
                    "input": {"type": "string", "maxLength": 4096, "description": "Partially typed path"},
                    "cwd": cwd,
                }),
                vec!["input"],
            ),
            ToolId::OpenApp => (
                json!({
                    "target": {"type": "string", "minLength": 1, "maxLength": 512, "description": "Program, desktop id, file or window name"},
                    "action": {"type": "string", "enum": ["open", "focus"], "default": "open"},
                    "hintClass": {"type": "string", "minLength": 1, "maxLength": 256, "description": "Window class, tried first when focusing"},
                }),
                vec!["target"],
            ),
            ToolId::DoAnything => (
                json!({
                    "goal": {"type": "string", "minLength": 1, "maxLength": 4000},
                    "dryRun": flag("Record proposals without executing them"),
                    "maxSteps": {"type": "integer", "minimum": 1, "maximum": MAX_AGENT_STEPS},
                }),
                vec!["goal", "maxSteps"],
            ),
        };

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

// ============================================================================
// TYPED REQUESTS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PathArgs {
    pub path: String,
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirArgs {
    pub path: String,
    pub cwd: Option<String>,
    pub include_hidden: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteArgs {
    pub path: String,
    pub cwd: Option<String>,
    pub content: String,
    pub encoding: ContentEncoding,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecursiveArgs {
    pub path: String,
    pub cwd: Option<String>,
    pub recursive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveArgs {
    pub from: String,
    pub to: String,
    pub cwd: Option<String>,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindArgs {
    pub root_dir: String,
    pub cwd: Option<String>,
    pub query: String,
    pub max_results: Option<usize>,
    pub include_hidden: bool,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteArgs {
    pub input: String,
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAppArgs {
    pub target: String,
    pub action: LaunchAction,
    pub hint_class: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoAnythingArgs {
    pub goal: String,
    pub dry_run: bool,
    pub max_steps: usize,
}

/// One variant per tool, built only from validated input
#[derive(Debug, Clone)]
pub enum ToolRequest {
    Exists(PathArgs),
    Stat(PathArgs),
    Dir(DirArgs),
    Read(PathArgs),
    Write(WriteArgs),
    Mkdir(RecursiveArgs),
    Move(MoveArgs),
    Delete(RecursiveArgs),
    Find(FindArgs),
    Complete(CompleteArgs),
    OpenApp(OpenAppArgs),
    DoAnything(DoAnythingArgs),
}

impl ToolRequest {
    pub fn from_validated(id: ToolId, args: Value) -> Result<Self> {
        Ok(match id {
            ToolId::FsExists => ToolRequest::Exists(typed(args)?),
            ToolId::FsStat => ToolRequest::Stat(typed(args)?),
            ToolId::FsDir => ToolRequest::Dir(typed(args)?),
            ToolId::FsRead => ToolRequest::Read(typed(args)?),
            ToolId::FsWrite => ToolRequest::Write(typed(args)?),
            ToolId::FsMkdir => ToolRequest::Mkdir(typed(args)?),
            ToolId::FsMove => ToolRequest::Move(typed(args)?),
            ToolId::FsDelete => ToolRequest::Delete(typed(args)?),
            ToolId::FsFind => ToolRequest::Find(typed(args)?),
            ToolId::FsComplete => ToolRequest::Complete(typed(args)?),
            ToolId::OpenApp => ToolRequest::OpenApp(typed(args)?),
            ToolId::DoAnything => ToolRequest::DoAnything(typed(args)?),
        })
    }
}

fn typed<T: DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| GateError::bad_request(format!("invalid arguments: {}", e)))
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| GateError::internal(format!("serialize result: {}", e)))
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Per-call context handed to every handler
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, request: ToolRequest, ctx: &CallContext) -> Result<Value>;
}

pub struct FsHandler {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl ToolHandler for FsHandler {
    async fn handle(&self, request: ToolRequest, _ctx: &CallContext) -> Result<Value> {
        let sb = &self.sandbox;
        match request {
            ToolRequest::Exists(a) => to_json(sb.exists(&a.path, a.cwd.as_deref()).await?),
            ToolRequest::Stat(a) => to_json(sb.stat(&a.path, a.cwd.as_deref()).await?),
            ToolRequest::Dir(a) => to_json(sb.list(&a.path, a.include_hidden, a.cwd.as_deref()).await?),
            ToolRequest::Read(a) => to_json(sb.read(&a.path, a.cwd.as_deref()).await?),
            ToolRequest::Write(a) => {
                let data = match a.encoding {
                    ContentEncoding::Utf8 => a.content.into_bytes(),
                    ContentEncoding::Base64 => base64::engine::general_purpose::STANDARD
                        .decode(a.content.trim())
                        .map_err(|e| GateError::bad_request(format!("content is not valid base64: {}", e)))?,
                };
                to_json(sb.write(&a.path, &data, a.cwd.as_deref()).await?)
            }
            ToolRequest::Mkdir(a) => to_json(sb.mkdir(&a.path, a.recursive, a.cwd.as_deref()).await?),
            ToolRequest::Move(a) => to_json(sb.rename(&a.from, &a.to, a.overwrite, a.cwd.as_deref()).await?),
            ToolRequest::Delete(a) => to_json(sb.delete(&a.path, a.recursive, a.cwd.as_deref()).await?),
            ToolRequest::Find(a) => {
                let opts = FindOptions {
                    max_results: a.max_results,
                    include_hidden: a.include_hidden,
                    exclude: a.exclude,
                };
                to_json(sb.find(&a.root_dir, &a.query, opts, a.cwd.as_deref()).await?)
            }
            ToolRequest::Complete(a) => to_json(sb.complete(&a.input, a.cwd.as_deref()).await?),
            other => Err(GateError::internal(format!("filesystem handler got {:?}", other))),
        }
    }
}

pub struct LaunchHandler {
    launcher: Arc<Launcher>,
}

#[async_trait]
impl ToolHandler for LaunchHandler {
    async fn handle(&self, request: ToolRequest, _ctx: &CallContext) -> Result<Value> {
        match request {
            ToolRequest::OpenApp(a) => {
                let report = match a.action {
                    LaunchAction::Open => self.launcher.open(&a.target).await?,
                    LaunchAction::Focus => self.launcher.focus(&a.target, a.hint_class.as_deref()).await?,
                };
                to_json(report)
            }
            other => Err(GateError::internal(format!("launch handler got {:?}", other))),
        }
    }
}

pub struct AgentHandler {
    agent: Arc<ActionLoop>,
    max_steps_cap: usize,
}

#[async_trait]
impl ToolHandler for AgentHandler {
    async fn handle(&self, request: ToolRequest, ctx: &CallContext) -> Result<Value> {
        match request {
            ToolRequest::DoAnything(a) => {
                let budget = a.max_steps.min(self.max_steps_cap).max(1);
                if budget < a.max_steps {
                    log::info!("maxSteps {} clamped to {}", a.max_steps, budget);
                }
                let session = AgentSession::new(a.goal, a.dry_run, budget);
                to_json(self.agent.run(session, &ctx.cancel).await)
            }
            other => Err(GateError::internal(format!("agent handler got {:?}", other))),
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

pub struct ToolDescriptor {
    pub id: ToolId,
    pub input_schema: Value,
    schema: Schema,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    /// MCP tools/list entry
    pub fn definition(&self) -> Value {
        json!({
            "name": self.id.name(),
            "description": self.id.description(),
            "inputSchema": self.input_schema,
        })
    }
}

pub struct Registry {
    tools: Vec<ToolDescriptor>,
}

impl Registry {
    /// `agent` is `None` when no reasoning service is configured;
    /// `do_anything` is then left out of the catalogue.
    pub fn new(
        sandbox: Arc<Sandbox>,
        launcher: Arc<Launcher>,
        agent: Option<Arc<ActionLoop>>,
        max_steps_cap: usize,
    ) -> anyhow::Result<Self> {
        let fs: Arc<dyn ToolHandler> = Arc::new(FsHandler { sandbox });
        let launch: Arc<dyn ToolHandler> = Arc::new(LaunchHandler { launcher });
        let agent: Option<Arc<dyn ToolHandler>> = agent.map(|agent| {
            Arc::new(AgentHandler { agent, max_steps_cap: max_steps_cap.max(1) }) as Arc<dyn ToolHandler>
        });

        let mut tools = Vec::new();
        for id in ToolId::ALL {
            let handler = match id {
                ToolId::OpenApp => launch.clone(),
                ToolId::DoAnything => match &agent {
                    Some(h) => h.clone(),
                    None => continue,
                },
                _ => fs.clone(),
            };
            let input_schema = id.input_schema();
            let schema = Schema::compile(&input_schema)
                .map_err(|e| anyhow::anyhow!("schema for {}: {}", id.name(), e))?;
            tools.push(ToolDescriptor { id, input_schema, schema, handler });
        }

        log::info!(
            "Registered tools: {}",
            tools.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
        );
        Ok(Self { tools })
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn definitions(&self) -> Vec<Value> {
        self.tools.iter().map(ToolDescriptor::definition).collect()
    }

    /// validate -> typed request -> handler
    pub async fn invoke(&self, name: &str, args: &Value, ctx: &CallContext) -> Result<Value> {
        let tool = self.get(name)
            .ok_or_else(|| GateError::NotFound(format!("unknown tool: {}", name)))?;
        let args = if args.is_null() { json!({}) } else { args.clone() };
        let validated = tool.schema.check(&args)?;
        let request = ToolRequest::from_validated(tool.id, validated)?;
        tool.handler.handle(request, ctx).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
