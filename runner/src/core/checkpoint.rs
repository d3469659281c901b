//! Crash-safe progress state for a session.
//!
//! The checkpoint is the runner's own memory of which tasks were attempted,
//! completed, and blocked. It is mutated only by the runner loop and persisted
//! after every task transition (see `io::checkpoint_store`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Persisted session progress (`checkpoint.json`).
///
/// Invariants: `done_task_ids` and `blocked_task_ids` are disjoint; every id
/// in either set has an attempt count of at least 1; attempt counts never
/// decrease across writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Checkpoint {
    /// ISO-8601 UTC timestamp of the last write, stamped on save.
    pub updated_at: String,
    /// Attempt count per task id, starting at 1 for the first attempt.
    pub attempts: BTreeMap<String, u32>,
    /// Completed task ids, in insertion order.
    pub done_task_ids: Vec<String>,
    /// Retry-exhausted task ids, in insertion order.
    pub blocked_task_ids: Vec<String>,
    /// The task most recently handed to the executor.
    pub last_task_id: Option<String>,
}

impl Checkpoint {
    /// Bump the attempt counter for `id`, record it as the last attempted
    /// task, and return the new (1-based) attempt number.
    pub fn begin_attempt(&mut self, id: &str) -> u32 {
        let attempt = self.attempts.entry(id.to_string()).or_insert(0);
        *attempt += 1;
        self.last_task_id = Some(id.to_string());
        *attempt
    }

    /// Mark `id` done, releasing it from the blocked set if present.
    pub fn record_done(&mut self, id: &str) {
        if !self.done_task_ids.iter().any(|d| d == id) {
            self.done_task_ids.push(id.to_string());
        }
        self.blocked_task_ids.retain(|b| b != id);
    }

    /// Mark `id` blocked. A blocked task is never simultaneously done.
    pub fn record_blocked(&mut self, id: &str) {
        if !self.blocked_task_ids.iter().any(|b| b == id) {
            self.blocked_task_ids.push(id.to_string());
        }
        self.done_task_ids.retain(|d| d != id);
    }

    pub fn attempts_for(&self, id: &str) -> u32 {
        self.attempts.get(id).copied().unwrap_or(0)
    }

    pub fn is_done(&self, id: &str) -> bool {
        self.done_task_ids.iter().any(|d| d == id)
    }

    pub fn is_blocked(&self, id: &str) -> bool {
        self.blocked_task_ids.iter().any(|b| b == id)
    }
}
