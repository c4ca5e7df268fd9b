// Oasis Gate - Configuration
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Loads gateway configuration: sandbox roots, filesystem limits, launcher
// timing, agent bounds, reasoning endpoint, rate limits.
// Order: defaults -> JSON file (if present) -> environment overrides.

use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const REASONING_URL_ENV: &str = "OASIS_REASONING_URL";
pub const REASONING_MODEL_ENV: &str = "OASIS_REASONING_MODEL";
pub const REASONING_KEY_ENV: &str = "OASIS_REASONING_API_KEY";

/// Master gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Raw root entries, may be `~`-relative. Empty = one implicit root.
    pub allowed_roots: Vec<String>,
    pub filesystem: FsConfig,
    pub launcher: LauncherConfig,
    pub agent: AgentConfig,
    pub reasoning: ReasoningConfig,
    pub rate_limits: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub max_read_bytes: u64,
    pub default_find_results: usize,
    /// Directory names `fs_find` never descends into
    pub find_exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// A directly spawned target still alive after this window counts as launched
    pub launch_settle_ms: u64,
    pub helper_cache_ttl_secs: u64,
    pub helper_cache_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_steps_cap: usize,
    pub run_timeout_secs: u64,
    pub max_wait_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// OpenAI-compatible base URL; `do_anything` is only registered when set
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub reads_per_minute: usize,
    pub mutations_per_minute: usize,
    pub agent_per_minute: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            max_read_bytes: 10 * 1024 * 1024,
            default_find_results: 200,
            find_exclude: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "target".to_string(),
                "__pycache__".to_string(),
                ".venv".to_string(),
                "venv".to_string(),
                "dist".to_string(),
            ],
        }
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            launch_settle_ms: 1500,
            helper_cache_ttl_secs: 300,
            helper_cache_capacity: 64,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps_cap: 25,
            run_timeout_secs: 30,
            max_wait_ms: 10_000,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reads_per_minute: 120,
            mutations_per_minute: 60,
            agent_per_minute: 10,
        }
    }
}

impl GateConfig {
    /// Load config from JSON file, falling back to defaults, then apply env
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)?;
            log::info!("Config loaded from {:?}", path);
            config
        } else {
            log::warn!("Config not found at {:?}, using defaults", path);
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Environment wins over file values
    pub fn apply_env(&mut self) {
        if let Some(roots) = paths::roots_from_env() {
            self.allowed_roots = roots;
        }
        if let Ok(url) = std::env::var(REASONING_URL_ENV) {
            if !url.trim().is_empty() {
                self.reasoning.endpoint = Some(url);
            }
        }
        if let Ok(model) = std::env::var(REASONING_MODEL_ENV) {
            if !model.trim().is_empty() {
                self.reasoning.model = Some(model);
            }
        }
        if let Ok(key) = std::env::var(REASONING_KEY_ENV) {
            if !key.trim().is_empty() {
                self.reasoning.api_key = Some(key);
            }
        }
    }

    /// Save config to JSON file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let mut redacted = self.clone();
        if redacted.reasoning.api_key.is_some() {
            redacted.reasoning.api_key = Some("<redacted>".to_string());
        }
        let content = serde_json::to_string_pretty(&redacted)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Root entries to realize at startup
    pub fn root_entries(&self) -> Vec<String> {
        if self.allowed_roots.is_empty() {
            vec![paths::default_root().to_string_lossy().to_string()]
        } else {
            self.allowed_roots.clone()
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded() {
        let config = GateConfig::default();
        assert_eq!(config.agent.max_steps_cap, 25);
        assert_eq!(config.filesystem.default_find_results, 200);
        assert!(config.filesystem.find_exclude.iter().any(|d| d == ".git"));
        assert!(config.rate_limits.enabled);
        assert!(config.reasoning.endpoint.is_none());
    }

    #[test]
    fn empty_roots_fall_back_to_one_implicit_root() {
        let config = GateConfig::default();
        assert_eq!(config.root_entries().len(), 1);
    }

    #[test]
    fn partial_json_keeps_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("gate.json");
        std::fs::write(&path, r#"{"allowed_roots": ["/srv/data"], "agent": {"max_steps_cap": 5}}"#)?;
        let config: GateConfig = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(config.allowed_roots, vec!["/srv/data".to_string()]);
        assert_eq!(config.agent.max_steps_cap, 5);
        assert_eq!(config.agent.run_timeout_secs, 30);
        assert_eq!(config.launcher.launch_settle_ms, 1500);
        Ok(())
    }

    #[test]
    fn save_redacts_api_key() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.json");
        let mut config = GateConfig::default();
        config.reasoning.api_key = Some("sk-secret".to_string());
        config.save(&path)?;
        let written = std::fs::read_to_string(&path)?;
        assert!(!written.contains("sk-secret"));
        Ok(())
    }
}
