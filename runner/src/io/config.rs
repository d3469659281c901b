//! Runner configuration stored under `<session>/config.toml`.
//!
//! Intended to be edited by humans. Missing fields default to the documented
//! values; CLI flags override individual fields after loading.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{AgentsMode, ReasoningEffort, RunMode};
use crate::io::executor::DEFAULT_IDLE_TIMEOUT_MS;

/// Runtime knobs for a session (TOML).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Plan schema: `lite`, `full`, or `auto` (resolves to full).
    pub mode: RunMode,
    pub agents_mode: AgentsMode,
    /// Retries after the first failed attempt; a task gets `max_retries + 1`
    /// tries in total.
    pub max_retries: u32,
    pub max_tasks: Option<u32>,
    pub continue_on_failure: bool,
    /// Taskmaster tag to run; the store default when unset.
    pub tag: Option<String>,
    /// Skip remote template fetches during init.
    pub disable_remote: bool,
    /// Agent executable.
    pub executor: String,
    pub model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub full_auto: bool,
    pub skip_git_repo_check: bool,
    /// Idle timeout in milliseconds; <= 0 disables it.
    pub exec_idle_timeout_ms: i64,
    /// Absolute cap per attempt in milliseconds; unset or <= 0 disables it.
    #[serde(alias = "exec_timeout_ms")]
    pub exec_hard_timeout_ms: Option<i64>,
    pub terminate_on_result: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            agents_mode: AgentsMode::default(),
            max_retries: 3,
            max_tasks: None,
            continue_on_failure: true,
            tag: None,
            disable_remote: false,
            executor: "codex".to_string(),
            model: None,
            reasoning_effort: None,
            full_auto: true,
            skip_git_repo_check: true,
            exec_idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            exec_hard_timeout_ms: None,
            terminate_on_result: true,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.executor.trim().is_empty() {
            return Err(anyhow!("executor must not be empty"));
        }
        if self.max_tasks == Some(0) {
            return Err(anyhow!("max_tasks must be at least 1 when set"));
        }
        Ok(())
    }
}

/// Load config from a TOML file; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
