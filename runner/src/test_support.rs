//! Scripted doubles shared by unit and integration tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};

use crate::core::clock::Clock;
use crate::core::sentinel::{ParsedResult, SentinelStatus, Validation};
use crate::core::types::{ExecOutcome, Task, TaskStatus, TimeoutKind};
use crate::io::executor::{ExecRequest, Executor, OutputSink};
use crate::store::TaskStore;

/// Clock pinned to one instant, for byte-reproducible artifacts.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(DateTime<Utc>);

impl FixedClock {
    pub fn at(timestamp: &str) -> Self {
        Self(timestamp.parse().expect("valid RFC 3339 timestamp"))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Create a pending task with deterministic defaults and no subtasks.
pub fn task(id: &str, title: &str) -> Task {
    Task {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("{title} description"),
        ..Task::default()
    }
}

/// Create a task with explicit dependencies.
pub fn task_with_deps(id: &str, title: &str, deps: &[&str]) -> Task {
    let mut task = task(id, title);
    task.dependencies = deps.iter().map(|d| d.to_string()).collect();
    task
}

/// Scripted outcome: exit code only, no sentinel.
pub fn outcome_exit(code: i32) -> ExecOutcome {
    ExecOutcome {
        exit_code: Some(code),
        signal: None,
        duration_ms: 42,
        log_path: PathBuf::from("scripted.log"),
        timed_out: false,
        timeout_kind: None,
        timeout_limit_ms: None,
        parsed: None,
    }
}

/// Scripted outcome carrying a parsed sentinel.
pub fn outcome_sentinel(
    status: SentinelStatus,
    validation: Validation,
    summary: &str,
    exit_code: Option<i32>,
) -> ExecOutcome {
    ExecOutcome {
        parsed: Some(ParsedResult {
            status,
            validation,
            summary: summary.to_string(),
            raw: format!("{{\"status\":\"{}\"}}", status.as_str()),
        }),
        exit_code,
        ..outcome_exit(0)
    }
}

/// Scripted outcome for a timed-out attempt with no sentinel.
pub fn outcome_timeout(kind: TimeoutKind, limit_ms: u64) -> ExecOutcome {
    ExecOutcome {
        exit_code: None,
        signal: Some("SIGKILL".to_string()),
        timed_out: true,
        timeout_kind: Some(kind),
        timeout_limit_ms: Some(limit_ms),
        ..outcome_exit(0)
    }
}

/// Executor that replays a queue of predetermined outcomes and records the
/// requests it received.
pub struct ScriptedExecutor {
    queue: Mutex<VecDeque<Result<ExecOutcome>>>,
    requests: Mutex<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn new(outcomes: Vec<ExecOutcome>) -> Self {
        Self {
            queue: Mutex::new(outcomes.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a spawn-level failure instead of an outcome.
    pub fn failing(message: &str) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(Err(anyhow!("{message}")));
        Self {
            queue: Mutex::new(queue),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Prompts passed to the executor, in invocation order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("lock")
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }

    pub fn assert_drained(&self) {
        assert!(
            self.queue.lock().expect("lock").is_empty(),
            "scripted executor has unconsumed outcomes"
        );
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, request: &ExecRequest, _sink: &dyn OutputSink) -> Result<ExecOutcome> {
        self.requests.lock().expect("lock").push(request.clone());
        let mut outcome = self
            .queue
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted executor exhausted")))?;
        outcome.log_path = request.log_path.clone();
        Ok(outcome)
    }
}

/// In-memory task store mirroring the file store's selection rules and
/// recording every status transition.
pub struct InMemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
    transitions: Mutex<Vec<(String, TaskStatus)>>,
}

impl InMemoryTaskStore {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            transitions: Mutex::new(Vec::new()),
        }
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.tasks
            .lock()
            .expect("lock")
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.status)
    }

    /// Every `(task id, status)` write, in order.
    pub fn transitions(&self) -> Vec<(String, TaskStatus)> {
        self.transitions.lock().expect("lock").clone()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn next_task(&self) -> Result<Option<Task>> {
        let tasks = self.tasks.lock().expect("lock");
        Ok(tasks
            .iter()
            .find(|task| {
                matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress)
                    && task.dependencies.iter().all(|dep| {
                        tasks
                            .iter()
                            .any(|t| &t.id == dep && t.status.is_finished())
                    })
            })
            .cloned())
    }

    fn all_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.lock().expect("lock").clone())
    }

    fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let mut tasks = self.tasks.lock().expect("lock");
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| anyhow!("task '{task_id}' not found"))?;
        task.status = status;
        self.transitions
            .lock()
            .expect("lock")
            .push((task_id.to_string(), status));
        Ok(())
    }
}

/// Store whose every call fails, for fatal-error paths.
pub struct FailingTaskStore;

impl TaskStore for FailingTaskStore {
    fn next_task(&self) -> Result<Option<Task>> {
        Err(anyhow!("store unavailable"))
    }

    fn all_tasks(&self) -> Result<Vec<Task>> {
        Err(anyhow!("store unavailable"))
    }

    fn set_status(&self, _task_id: &str, _status: TaskStatus) -> Result<()> {
        Err(anyhow!("store unavailable"))
    }
}
