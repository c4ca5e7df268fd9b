// Oasis Gate - Input Validator
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Compiles declarative JSON schemas into argument acceptors:
// - Closed objects reject unknown fields
// - String length, numeric range, enum membership, array shape
// - Defaults filled for absent optional fields
// Also screens agent-proposed shell commands before dispatch.
// Pure functions. Nothing here touches the filesystem or network.

use crate::error::{FieldIssue, GateError};
use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// SCHEMA TREE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    String {
        min_len: Option<usize>,
        max_len: Option<usize>,
        choices: Option<Vec<String>>,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Boolean,
    Array {
        items: Option<Box<Schema>>,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
    Object {
        fields: BTreeMap<String, Schema>,
        required: BTreeSet<String>,
        closed: bool,
    },
}

/// Compiled acceptor for one JSON shape
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub kind: SchemaKind,
    pub default: Option<Value>,
}

impl Schema {
    /// Compile a JSON-Schema-shaped literal. Unsupported keywords are ignored,
    /// unknown types and malformed bounds are rejected.
    pub fn compile(raw: &Value) -> anyhow::Result<Self> {
        compile_at(raw, "$")
    }

    /// Narrow raw input to this schema, filling defaults.
    pub fn check(&self, input: &Value) -> Result<Value, GateError> {
        let mut issues = Vec::new();
        match self.narrow(input, "$", &mut issues) {
            Some(value) if issues.is_empty() => Ok(value),
            _ => Err(GateError::invalid_fields(issues)),
        }
    }

    fn narrow(&self, value: &Value, path: &str, issues: &mut Vec<FieldIssue>) -> Option<Value> {
        match &self.kind {
            SchemaKind::String { min_len, max_len, choices } => {
                let s = match value.as_str() {
                    Some(s) => s,
                    None => return mismatch(path, "string", value, issues),
                };
                let len = s.chars().count();
                if let Some(min) = min_len {
                    if len < *min {
                        issues.push(FieldIssue::new(path, format!("must be at least {} characters", min)));
                    }
                }
                if let Some(max) = max_len {
                    if len > *max {
                        issues.push(FieldIssue::new(path, format!("must be at most {} characters", max)));
                    }
                }
                if let Some(choices) = choices {
                    if !choices.iter().any(|c| c == s) {
                        issues.push(FieldIssue::new(path, format!("must be one of: {}", choices.join(", "))));
                    }
                }
                Some(value.clone())
            }

            SchemaKind::Integer { min, max } => {
                let n = match value.as_i64() {
                    Some(n) => n,
                    None if value.is_u64() => {
                        issues.push(FieldIssue::new(path, "integer out of range"));
                        return None;
                    }
                    None => return mismatch(path, "integer", value, issues),
                };
                if let Some(min) = min {
                    if n < *min {
                        issues.push(FieldIssue::new(path, format!("must be >= {}", min)));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        issues.push(FieldIssue::new(path, format!("must be <= {}", max)));
                    }
                }
                Some(value.clone())
            }

            SchemaKind::Number { min, max } => {
                let n = match value.as_f64() {
                    Some(n) => n,
                    None => return mismatch(path, "number", value, issues),
                };
                if let Some(min) = min {
                    if n < *min {
                        issues.push(FieldIssue::new(path, format!("must be >= {}", min)));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        issues.push(FieldIssue::new(path, format!("must be <= {}", max)));
                    }
                }
                Some(value.clone())
            }

            SchemaKind::Boolean => {
                if value.is_boolean() {
                    Some(value.clone())
                } else {
                    mismatch(path, "boolean", value, issues)
                }
            }

            SchemaKind::Array { items, min_items, max_items } => {
                let arr = match value.as_array() {
                    Some(a) => a,
                    None => return mismatch(path, "array", value, issues),
                };
                if let Some(min) = min_items {
                    if arr.len() < *min {
                        issues.push(FieldIssue::new(path, format!("must contain at least {} items", min)));
                    }
                }
                if let Some(max) = max_items {
                    if arr.len() > *max {
                        issues.push(FieldIssue::new(path, format!("must contain at most {} items", max)));
                    }
                }
                let mut out = Vec::with_capacity(arr.len());
                for (i, item) in arr.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    match items {
                        Some(schema) => {
                            if let Some(v) = schema.narrow(item, &item_path, issues) {
                                out.push(v);
                            }
                        }
                        None => out.push(item.clone()),
                    }
                }
                Some(Value::Array(out))
            }

            SchemaKind::Object { fields, required, closed } => {
                let obj = match value.as_object() {
                    Some(o) => o,
                    None => return mismatch(path, "object", value, issues),
                };
                let mut out = Map::new();

                if *closed {
                    for key in obj.keys() {
                        if !fields.contains_key(key) {
                            issues.push(FieldIssue::new(format!("{}.{}", path, key), "unknown field"));
                        }
                    }
                }

                for (name, schema) in fields {
                    let field_path = format!("{}.{}", path, name);
                    match obj.get(name) {
                        Some(v) if !v.is_null() => {
                            if let Some(narrowed) = schema.narrow(v, &field_path, issues) {
                                out.insert(name.clone(), narrowed);
                            }
                        }
                        _ => {
                            if required.contains(name) {
                                issues.push(FieldIssue::new(field_path, "is required"));
                            } else if let Some(default) = &schema.default {
                                out.insert(name.clone(), default.clone());
                            }
                        }
                    }
                }

                // Open objects keep their extra members untouched
                if !*closed {
                    for (key, v) in obj {
                        if !fields.contains_key(key) {
                            out.insert(key.clone(), v.clone());
                        }
                    }
                }

                Some(Value::Object(out))
            }
        }
    }
}

fn mismatch(path: &str, expected: &str, got: &Value, issues: &mut Vec<FieldIssue>) -> Option<Value> {
    issues.push(FieldIssue::new(path, format!("expected {}, got {}", expected, type_name(got))));
    None
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// SCHEMA COMPILATION
// ============================================================================

fn compile_at(raw: &Value, path: &str) -> anyhow::Result<Schema> {
    let obj = raw.as_object()
        .ok_or_else(|| anyhow!("schema at {} must be an object", path))?;
    let ty = obj.get("type").and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("schema at {} has no type", path))?;

    let kind = match ty {
        "string" => {
            let choices = match obj.get("enum") {
                Some(Value::Array(items)) => Some(
                    items.iter()
                        .map(|v| v.as_str().map(str::to_string)
                            .ok_or_else(|| anyhow!("enum at {} must list strings", path)))
                        .collect::<anyhow::Result<Vec<_>>>()?,
                ),
                Some(_) => bail!("enum at {} must be an array", path),
                None => None,
            };
            SchemaKind::String {
                min_len: usize_keyword(obj, "minLength", path)?,
                max_len: usize_keyword(obj, "maxLength", path)?,
                choices,
            }
        }
        "integer" => SchemaKind::Integer {
            min: obj.get("minimum").map(|v| v.as_i64()
                .ok_or_else(|| anyhow!("minimum at {} must be an integer", path))).transpose()?,
            max: obj.get("maximum").map(|v| v.as_i64()
                .ok_or_else(|| anyhow!("maximum at {} must be an integer", path))).transpose()?,
        },
        "number" => SchemaKind::Number {
            min: obj.get("minimum").and_then(|v| v.as_f64()),
            max: obj.get("maximum").and_then(|v| v.as_f64()),
        },
        "boolean" => SchemaKind::Boolean,
        "array" => SchemaKind::Array {
            items: match obj.get("items") {
                Some(items) => Some(Box::new(compile_at(items, &format!("{}[]", path))?)),
                None => None,
            },
            min_items: usize_keyword(obj, "minItems", path)?,
            max_items: usize_keyword(obj, "maxItems", path)?,
        },
        "object" => {
            let mut fields = BTreeMap::new();
            if let Some(props) = obj.get("properties") {
                let props = props.as_object()
                    .ok_or_else(|| anyhow!("properties at {} must be an object", path))?;
                for (name, sub) in props {
                    fields.insert(name.clone(), compile_at(sub, &format!("{}.{}", path, name))?);
                }
            }
            let mut required = BTreeSet::new();
            if let Some(req) = obj.get("required") {
                let req = req.as_array()
                    .ok_or_else(|| anyhow!("required at {} must be an array", path))?;
                for name in req {
                    let name = name.as_str()
                        .ok_or_else(|| anyhow!("required at {} must list strings", path))?;
                    if !fields.contains_key(name) {
                        bail!("required field {}.{} has no schema", path, name);
                    }
                    required.insert(name.to_string());
                }
            }
            let closed = matches!(obj.get("additionalProperties"), Some(Value::Bool(false)));
            SchemaKind::Object { fields, required, closed }
        }
        other => bail!("unsupported type '{}' at {}", other, path),
    };

    let schema = Schema { kind, default: obj.get("default").cloned() };

    // A default must itself satisfy the schema
    if let Some(default) = &schema.default {
        let mut issues = Vec::new();
        if schema.narrow(default, path, &mut issues).is_none() || !issues.is_empty() {
            bail!("default at {} does not satisfy its schema", path);
        }
    }

    Ok(schema)
}

fn usize_keyword(obj: &Map<String, Value>, key: &str, path: &str) -> anyhow::Result<Option<usize>> {
    obj.get(key)
        .map(|v| v.as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| anyhow!("{} at {} must be a non-negative integer", key, path)))
        .transpose()
}

// ============================================================================
// COMMAND SCREENING (agent `run` proposals)
// ============================================================================

/// Screening result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { valid: true, warnings: Vec::new(), errors: Vec::new() }
    }

    pub fn warn(&mut self, msg: String) {
        self.warnings.push(msg);
    }

    pub fn error(&mut self, msg: String) {
        self.valid = false;
        self.errors.push(msg);
    }
}

const DANGEROUS_COMMANDS: &[(&str, &str)] = &[
    ("rm -rf /", "recursive delete of filesystem root"),
    ("rm -rf ~", "recursive delete of home directory"),
    ("rm -rf *", "recursive wildcard delete"),
    ("dd if=", "raw device copy"),
    ("> /dev/sd", "direct device write"),
    ("mkfs", "filesystem format command"),
    ("chmod 777", "world-writable permissions"),
    ("chmod 0777", "chmod 0777 is equivalent to chmod 777"),
    ("chmod a+rwx", "chmod a+rwx is equivalent to chmod 777"),
    (":(){", "fork bomb"),
    ("shutdown", "system shutdown"),
    ("reboot", "system reboot"),
];

/// Screen a shell command proposed by the action loop
pub fn validate_command(command: &str) -> ValidationResult {
    let mut result = ValidationResult::ok();

    if command.trim().is_empty() {
        result.error("EMPTY COMMAND".to_string());
        return result;
    }

    // Collapse whitespace so spacing tricks do not dodge the patterns
    let normalized: String = command.split_whitespace().collect::<Vec<_>>().join(" ");

    for (pattern, desc) in DANGEROUS_COMMANDS {
        if command.contains(pattern) || normalized.contains(pattern) {
            result.error(format!("DANGEROUS COMMAND: {}", desc));
        }
    }

    // Anything piped into a shell interpreter: curl ... | sh, cat x | /bin/bash
    let shell_interpreters = ["sh", "bash", "zsh", "dash"];
    let pipe_segments: Vec<&str> = normalized.split('|').collect();
    if pipe_segments.len() > 1 {
        for segment in &pipe_segments[1..] {
            let receiver = segment.split_whitespace().next().unwrap_or("");
            let base = receiver.rsplit('/').next().unwrap_or(receiver);
            if shell_interpreters.contains(&base) {
                result.error(format!("DANGEROUS COMMAND: pipe to shell interpreter '{}'", receiver));
            }
        }
    }

    if normalized.contains("sudo ") || normalized.starts_with("sudo") {
        result.warn("privilege escalation requested via sudo".to_string());
    }

    result
}

// ============================================================================
// TESTS
// ============================================================================
