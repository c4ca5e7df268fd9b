// Oasis Gate - Error Taxonomy
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Closed set of error kinds surfaced to callers. Every handler maps its
// failures into GateError; the transport serializes GateError::payload().

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stable kind tag carried by every error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    NotFound,
    RateLimit,
    InternalError,
    ModelOutputInvalid,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::InternalError => "INTERNAL_ERROR",
            ErrorKind::ModelOutputInvalid => "MODEL_OUTPUT_INVALID",
        }
    }
}

/// One (field path, reason) pair reported by the validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub path: String,
    pub reason: String,
}

impl FieldIssue {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { path: path.into(), reason: reason.into() }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    /// Malformed input, containment violation, filesystem precondition failure
    #[error("{message}")]
    BadRequest { message: String, issues: Vec<FieldIssue> },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited, retry after {retry_after_secs}s: {message}")]
    RateLimit { message: String, retry_after_secs: u64 },

    /// Exhausted fallback chain or unexpected collaborator failure
    #[error("{message}")]
    Internal { message: String, details: Option<Value> },

    #[error("model output invalid: {0}")]
    ModelOutputInvalid(String),
}

pub type Result<T> = std::result::Result<T, GateError>;

impl GateError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        GateError::BadRequest { message: message.into(), issues: Vec::new() }
    }

    pub fn invalid_fields(issues: Vec<FieldIssue>) -> Self {
        let message = match issues.as_slice() {
            [single] => format!("invalid argument {}: {}", single.path, single.reason),
            many => format!("{} invalid arguments", many.len()),
        };
        GateError::BadRequest { message, issues }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        GateError::Internal { message: message.into(), details: None }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GateError::BadRequest { .. } => ErrorKind::BadRequest,
            GateError::Unauthorized(_) => ErrorKind::Unauthorized,
            GateError::NotFound(_) => ErrorKind::NotFound,
            GateError::RateLimit { .. } => ErrorKind::RateLimit,
            GateError::Internal { .. } => ErrorKind::InternalError,
            GateError::ModelOutputInvalid(_) => ErrorKind::ModelOutputInvalid,
        }
    }

    /// Wire form: {kind, message, issues?, retryAfter?, details?}
    pub fn payload(&self) -> ErrorPayload {
        let mut payload = ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
            issues: None,
            retry_after: None,
            details: None,
        };
        match self {
            GateError::BadRequest { issues, .. } if !issues.is_empty() => {
                payload.issues = Some(issues.clone());
            }
            GateError::RateLimit { retry_after_secs, .. } => {
                payload.retry_after = Some(*retry_after_secs);
            }
            GateError::Internal { details, .. } => {
                payload.details = details.clone();
            }
            _ => {}
        }
        payload
    }

    /// Re-surface a filesystem error as BAD_REQUEST with its message
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        GateError::bad_request(format!("{}: {}", context, err))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<FieldIssue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        let err = GateError::ModelOutputInvalid("no json".into());
        let json = serde_json::to_value(err.payload()).unwrap();
        assert_eq!(json["kind"], "MODEL_OUTPUT_INVALID");
        assert_eq!(ErrorKind::InternalError.as_str(), "INTERNAL_ERROR");
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = GateError::RateLimit { message: "slow down".into(), retry_after_secs: 12 };
        let json = serde_json::to_value(err.payload()).unwrap();
        assert_eq!(json["kind"], "RATE_LIMIT");
        assert_eq!(json["retryAfter"], 12);
    }

    #[test]
    fn single_issue_message_names_field() {
        let err = GateError::invalid_fields(vec![FieldIssue::new("$.path", "is required")]);
        assert_eq!(err.to_string(), "invalid argument $.path: is required");
        assert_eq!(err.payload().issues.unwrap().len(), 1);
    }
}
