//! Parser for the agent's machine-readable result sentinel.
//!
//! The agent's contract is to emit a single line
//! `RESULT: {"status":"done|failed","validation":"pass|fail|unknown","summary":"…"}`
//! before terminating. The runner scans its rolling output buffer backward and
//! accepts the last line that parses into a valid result object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal prefix the agent must place before the result object.
pub const RESULT_PREFIX: &str = "RESULT:";

/// Agent-declared outcome carried by the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentinelStatus {
    Done,
    Failed,
}

impl SentinelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentinelStatus::Done => "done",
            SentinelStatus::Failed => "failed",
        }
    }
}

/// Agent-declared validation verdict, coerced to `unknown` when absent or
/// outside the closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    Pass,
    Fail,
    Unknown,
}

impl Validation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Validation::Pass => "pass",
            Validation::Fail => "fail",
            Validation::Unknown => "unknown",
        }
    }
}

/// A successfully parsed sentinel line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedResult {
    pub status: SentinelStatus,
    pub validation: Validation,
    pub summary: String,
    /// The raw JSON fragment the result was parsed from.
    pub raw: String,
}

/// Scan `buffer` from the last line to the first and return the first valid
/// result found, or `None`.
///
/// A line qualifies when it contains [`RESULT_PREFIX`] followed by a JSON
/// object whose `status` lowercases to `done` or `failed`. Lines that carry
/// the prefix but fail to parse are skipped and the scan continues upward.
pub fn extract(buffer: &str) -> Option<ParsedResult> {
    buffer.lines().rev().find_map(parse_line)
}

fn parse_line(line: &str) -> Option<ParsedResult> {
    let at = line.find(RESULT_PREFIX)?;
    let payload = line[at + RESULT_PREFIX.len()..].trim();
    let start = payload.find('{')?;
    let end = payload.rfind('}')?;
    if end < start {
        return None;
    }
    let fragment = &payload[start..=end];
    let value: Value = serde_json::from_str(fragment).ok()?;
    let object = value.as_object()?;

    let status = match object
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("done") => SentinelStatus::Done,
        Some("failed") => SentinelStatus::Failed,
        _ => return None,
    };
    let validation = match object
        .get("validation")
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("pass") => Validation::Pass,
        Some("fail") => Validation::Fail,
        _ => Validation::Unknown,
    };
    let summary = object
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    Some(ParsedResult {
        status,
        validation,
        summary,
        raw: fragment.to_string(),
    })
}
