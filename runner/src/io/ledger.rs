//! Append-only attempt ledger (`ledger.jsonl`).
//!
//! One JSON object per line, flushed after every task transition. Entries are
//! never rewritten; the ledger is the audit trail for a session.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Terminal status of one recorded attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    InProgress,
    Done,
    Failed,
    Blocked,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::InProgress => "IN_PROGRESS",
            LedgerStatus::Done => "DONE",
            LedgerStatus::Failed => "FAILED",
            LedgerStatus::Blocked => "BLOCKED",
        }
    }
}

/// One immutable ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub timestamp: String,
    pub task_id: String,
    /// Title snapshot at the time of the attempt.
    pub title: String,
    pub attempt: u32,
    pub status: LedgerStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// Per-attempt log file, relative to the project root (POSIX form).
    pub log_file: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notes: Option<String>,
}

/// Append one entry and flush it.
pub fn append_entry(path: &Path, entry: &LedgerEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create ledger directory {}", parent.display()))?;
    }
    let line = serde_json::to_string(entry).context("serialize ledger entry")?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open ledger {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("append ledger {}", path.display()))?;
    file.flush()
        .with_context(|| format!("flush ledger {}", path.display()))?;
    Ok(())
}

/// Read all entries in order. Used by tests and the status command.
pub fn read_entries(path: &Path) -> Result<Vec<LedgerEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read ledger {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).with_context(|| format!("parse ledger line: {line}"))
        })
        .collect()
}
