//! Shared deterministic types for the runner core.
//!
//! These types define stable contracts between components. They carry no I/O
//! and must remain deterministic across runs.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::sentinel::ParsedResult;

/// Task lifecycle status as stored by the external task store.
///
/// The runner reads all of these but only ever writes `pending`,
/// `in-progress`, `done`, and `blocked`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Completed,
    Blocked,
    Cancelled,
    Deferred,
    Review,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Deferred => "deferred",
            TaskStatus::Review => "review",
        }
    }

    /// Statuses that count as finished for dependency checks.
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Completed)
    }
}

/// A task as read from the external task store.
///
/// Identifiers are strings and may be hierarchical (e.g. `"3.2"` for the
/// second subtask of task 3). Subtasks nest one level deep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub details: Option<String>,
    pub test_strategy: Option<String>,
    pub dependencies: Vec<String>,
    pub status: TaskStatus,
    pub subtasks: Vec<Task>,
}

/// Plan-projection schema selector.
///
/// `lite` writes a reduced plan at the project root; `full` writes the wide
/// plan plus a task-map file inside the session directory. The `auto`
/// spelling resolves to `full`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    Lite,
    #[default]
    Full,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Lite => "lite",
            RunMode::Full => "full",
        }
    }
}

impl Serialize for RunMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RunMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "lite" => Ok(RunMode::Lite),
            "full" | "auto" => Ok(RunMode::Full),
            other => Err(anyhow!(
                "unknown mode '{other}' (expected lite, full, or auto)"
            )),
        }
    }
}

/// How to treat an agent-context file that carries no hook block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentsMode {
    #[default]
    Append,
    Skip,
    Fail,
}

impl FromStr for AgentsMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "append" => Ok(AgentsMode::Append),
            "skip" => Ok(AgentsMode::Skip),
            "fail" => Ok(AgentsMode::Fail),
            other => Err(anyhow!(
                "unknown agents mode '{other}' (expected append, skip, or fail)"
            )),
        }
    }
}

/// Reasoning-effort level forwarded to the agent executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
    Xhigh,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
            ReasoningEffort::Xhigh => "xhigh",
        }
    }
}

impl FromStr for ReasoningEffort {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            "xhigh" => Ok(ReasoningEffort::Xhigh),
            other => Err(anyhow!(
                "unknown reasoning effort '{other}' (expected low, medium, high, or xhigh)"
            )),
        }
    }
}

/// Which attempt timer fired, when one did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutKind {
    Idle,
    Hard,
}

impl TimeoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutKind::Idle => "idle",
            TimeoutKind::Hard => "hard",
        }
    }
}

/// Which output stream a chunk arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Everything the executor observed about one agent attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Process exit code, absent when killed by a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal name, when the process died to one.
    pub signal: Option<String>,
    /// Wall-clock duration of the attempt in milliseconds.
    pub duration_ms: u64,
    /// Per-attempt log file the output was teed into.
    pub log_path: PathBuf,
    /// True when the idle or hard timer initiated termination.
    pub timed_out: bool,
    /// Which timer fired, when `timed_out` is set.
    pub timeout_kind: Option<TimeoutKind>,
    /// The millisecond bound of the timer that fired.
    pub timeout_limit_ms: Option<u64>,
    /// Sentinel result parsed from the output stream, if any.
    pub parsed: Option<ParsedResult>,
}
