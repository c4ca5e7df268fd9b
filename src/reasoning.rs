// Oasis Gate - Reasoning Client
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// OpenAI-compatible chat-completions client used as the action loop's
// reasoning collaborator. Returns raw model text; parsing is the loop's job.

use crate::agent::{Prompt, ReasoningService};
use crate::config::ReasoningConfig;
use crate::error::{GateError, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

pub struct HttpReasoner {
    client: Client,
    url: String,
    model: Option<String>,
    api_key: Option<String>,
}

impl HttpReasoner {
    /// `None` when no endpoint is configured
    pub fn from_config(config: &ReasoningConfig) -> anyhow::Result<Option<Self>> {
        let endpoint = match config.endpoint.as_deref().map(str::trim) {
            Some(e) if !e.is_empty() => e,
            _ => return Ok(None),
        };
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            anyhow::bail!("reasoning endpoint must be http(s): {}", endpoint);
        }

        let client = Client::builder()
            .user_agent(concat!("oasis-gate/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)))
            .build()?;

        Ok(Some(Self {
            client,
            url: completions_url(endpoint),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn completions_url(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

pub fn request_body(model: Option<&str>, prompt: &Prompt) -> Value {
    let mut content = vec![json!({ "type": "text", "text": prompt.user })];
    if let Some(image) = &prompt.image {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&image.data);
        content.push(json!({
            "type": "image_url",
            "image_url": { "url": format!("data:{};base64,{}", image.mime_type, encoded) },
        }));
    }

    let mut body = json!({
        "messages": [
            { "role": "system", "content": prompt.system },
            { "role": "user", "content": content },
        ],
        "temperature": 0,
    });
    if let Some(model) = model {
        body["model"] = json!(model);
    }
    body
}

/// Map a non-success HTTP status onto the error taxonomy
pub fn status_error(status: StatusCode, retry_after: Option<&str>, body: &str) -> GateError {
    let detail = body.trim().chars().take(300).collect::<String>();
    match status.as_u16() {
        401 | 403 => GateError::Unauthorized(format!("reasoning service rejected credentials (HTTP {})", status.as_u16())),
        404 => GateError::NotFound(format!("reasoning endpoint or model not found: {}", detail)),
        429 => GateError::RateLimit {
            message: "reasoning service rate limit".to_string(),
            retry_after_secs: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        code => GateError::internal(format!("reasoning service HTTP {}: {}", code, detail)),
    }
}

#[async_trait]
impl ReasoningService for HttpReasoner {
    async fn propose(&self, prompt: &Prompt) -> Result<String> {
        let body = request_body(self.model.as_deref(), prompt);
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await
            .map_err(|e| GateError::internal(format!("reasoning request failed: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp.headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after.as_deref(), &text));
        }

        let payload: Value = resp.json().await
            .map_err(|e| GateError::internal(format!("reasoning response not JSON: {}", e)))?;
        extract_content(&payload)
    }
}

/// `choices[0].message.content`, either a string or an array of text parts
fn extract_content(payload: &Value) -> Result<String> {
    let content = &payload["choices"][0]["message"]["content"];
    match content {
        Value::String(s) => Ok(s.clone()),
        Value::Array(parts) => Ok(parts.iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("")),
        _ => Err(GateError::internal("reasoning response has no message content")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Observation;
    use crate::error::ErrorKind;

    #[test]
    fn builds_completions_url() {
        assert_eq!(completions_url("http://localhost:8080/v1"), "http://localhost:8080/v1/chat/completions");
        assert_eq!(completions_url("https://x/v1/chat/completions/"), "https://x/v1/chat/completions");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_error(StatusCode::FORBIDDEN, None, "").kind(), ErrorKind::Unauthorized);
        assert_eq!(status_error(StatusCode::NOT_FOUND, None, "").kind(), ErrorKind::NotFound);
        assert_eq!(status_error(StatusCode::BAD_GATEWAY, None, "").kind(), ErrorKind::InternalError);
        match status_error(StatusCode::TOO_MANY_REQUESTS, Some("7"), "") {
            GateError::RateLimit { retry_after_secs, .. } => assert_eq!(retry_after_secs, 7),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn body_carries_image_as_data_url() {
        let prompt = Prompt {
            system: "sys".into(),
            user: "goal".into(),
            image: Some(Observation { mime_type: "image/png".into(), data: vec![1, 2, 3], summary: String::new() }),
        };
        let body = request_body(Some("m"), &prompt);
        assert_eq!(body["model"], "m");
        assert_eq!(body["messages"][1]["content"][1]["image_url"]["url"], "data:image/png;base64,AQID");
        assert!(request_body(None, &prompt).get("model").is_none());
    }

    #[test]
    fn content_accepts_string_or_parts() {
        let s = json!({"choices": [{"message": {"content": "{\"type\":\"done\"}"}}]});
        assert_eq!(extract_content(&s).unwrap(), "{\"type\":\"done\"}");
        let parts = json!({"choices": [{"message": {"content": [{"type": "text", "text": "a"}, {"text": "b"}]}}]});
        assert_eq!(extract_content(&parts).unwrap(), "ab");
        assert!(extract_content(&json!({})).is_err());
    }
}
