//! The runner loop: drive the agent through tasks, one subprocess per task,
//! until the store runs dry, a stop condition fires, or a failure ends the
//! run early.
//!
//! Strictly sequential: never more than one agent in flight. Progress is
//! persisted after every task transition so a crashed run resumes exactly
//! where it stopped.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::checkpoint::Checkpoint;
use crate::core::clock::Clock;
use crate::core::outcome::{self, Resolution};
use crate::core::types::{StreamKind, Task, TaskStatus};
use crate::io::checkpoint_store::{load_checkpoint, save_checkpoint};
use crate::io::executor::{ExecRequest, Executor, OutputSink};
use crate::io::ledger::{LedgerEntry, LedgerStatus, append_entry};
use crate::io::paths::{SessionPaths, rel_posix};
use crate::io::projection::sync_plan;
use crate::io::prompt::build_prompt;
use crate::store::TaskStore;

/// Loop-level policy knobs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Retries after the first failed attempt; a task gets `max_retries + 1`
    /// tries in total before it is blocked.
    pub max_retries: u32,
    /// Stop after this many executor invocations.
    pub max_tasks: Option<u32>,
    /// Keep going past a failed task instead of ending the run.
    pub continue_on_failure: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_tasks: None,
            continue_on_failure: true,
        }
    }
}

/// Why the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    AllComplete,
    Partial,
    Error,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::AllComplete => "all_complete",
            FinalStatus::Partial => "partial",
            FinalStatus::Error => "error",
        }
    }
}

/// Summary returned by [`run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub completed_task_ids: Vec<String>,
    pub blocked_task_ids: Vec<String>,
    pub attempts: BTreeMap<String, u32>,
    /// Executor invocations across the run (attempts, not distinct tasks).
    pub total_runs: u32,
    pub final_status: FinalStatus,
    pub error_message: Option<String>,
}

/// Per-attempt record handed to observers when a task attempt ends.
#[derive(Debug, Clone)]
pub struct TaskEndSummary {
    pub task_id: String,
    pub title: String,
    pub attempt: u32,
    pub status: LedgerStatus,
    pub success: bool,
    pub duration_ms: u64,
    pub note: String,
}

/// Optional run observers. Failures in these callbacks are contained and
/// never abort the loop.
pub trait RunObserver {
    fn on_task_start(&self, _task: &Task, _attempt: u32) {}
    fn on_task_end(&self, _summary: &TaskEndSummary) {}
    fn on_info(&self, _message: &str) {}
    fn on_warning(&self, _message: &str) {}
    fn on_output(&self, _stream: StreamKind, _chunk: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl RunObserver for NullObserver {}

/// Run tasks to completion or a stop condition.
///
/// Per iteration: ask the store for the next task, execute it, classify the
/// outcome, update checkpoint + ledger + plan + external status, and loop.
/// Task-store failures end the run with `error` after persisting progress.
pub fn run(
    store: &dyn TaskStore,
    executor: &dyn Executor,
    paths: &SessionPaths,
    options: &RunOptions,
    clock: &dyn Clock,
    observer: &dyn RunObserver,
) -> Result<RunResult> {
    let mut checkpoint = load_checkpoint(&paths.checkpoint_file)?;
    let mut total_runs: u32 = 0;
    let mut error_message: Option<String> = None;

    loop {
        let task = match store.next_task() {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(err) => {
                error_message = Some(format!("task store error: {err:#}"));
                break;
            }
        };

        if options.max_tasks.is_some_and(|max| total_runs >= max) {
            notify("on_info", || {
                observer.on_info("max tasks reached, stopping")
            });
            break;
        }

        let attempt = checkpoint.begin_attempt(&task.id);
        total_runs += 1;
        info!(task_id = %task.id, attempt, "starting task");
        if let Err(err) = store.set_status(&task.id, TaskStatus::InProgress) {
            error_message = Some(format!(
                "task store error marking {} in-progress: {err:#}",
                task.id
            ));
            break;
        }
        notify("on_task_start", || {
            observer.on_task_start(&task, attempt)
        });

        let log_path = paths.attempt_log(&task.id, attempt);
        let sink = ObserverSink { observer };
        let exec_result = build_prompt(&task, paths).and_then(|prompt| {
            executor.execute(
                &ExecRequest {
                    workdir: paths.root.clone(),
                    prompt,
                    log_path: log_path.clone(),
                },
                &sink,
            )
        });

        let (exec_outcome, resolution) = match exec_result {
            Ok(outcome) => {
                let resolution = outcome::resolve(&outcome);
                (Some(outcome), resolution)
            }
            Err(err) => {
                let note = format!("executor error: {err:#}");
                notify("on_warning", || observer.on_warning(&note));
                (
                    None,
                    Resolution {
                        success: false,
                        note,
                    },
                )
            }
        };

        let status = if resolution.success {
            LedgerStatus::Done
        } else if attempt > options.max_retries {
            LedgerStatus::Blocked
        } else {
            LedgerStatus::Failed
        };
        let transition = match status {
            LedgerStatus::Done => TaskStatus::Done,
            LedgerStatus::Blocked => TaskStatus::Blocked,
            _ => TaskStatus::Pending,
        };
        if let Err(err) = store.set_status(&task.id, transition) {
            error_message = Some(format!(
                "task store error marking {} {}: {err:#}",
                task.id,
                transition.as_str()
            ));
            break;
        }
        match status {
            LedgerStatus::Done => checkpoint.record_done(&task.id),
            LedgerStatus::Blocked => checkpoint.record_blocked(&task.id),
            _ => {}
        }

        append_entry(
            &paths.ledger_file,
            &LedgerEntry {
                timestamp: clock.now().to_rfc3339(),
                task_id: task.id.clone(),
                title: task.title.clone(),
                attempt,
                status,
                exit_code: exec_outcome.as_ref().and_then(|o| o.exit_code),
                duration_ms: exec_outcome.as_ref().map(|o| o.duration_ms).unwrap_or(0),
                log_file: rel_posix(&paths.root, &log_path),
                notes: Some(resolution.note.clone()),
            },
        )?;

        let summary = TaskEndSummary {
            task_id: task.id.clone(),
            title: task.title.clone(),
            attempt,
            status,
            success: resolution.success,
            duration_ms: exec_outcome.as_ref().map(|o| o.duration_ms).unwrap_or(0),
            note: resolution.note.clone(),
        };
        info!(task_id = %task.id, status = status.as_str(), "task attempt finished");
        notify("on_task_end", || observer.on_task_end(&summary));

        persist(store, &mut checkpoint, paths, clock)?;

        if !resolution.success && !options.continue_on_failure {
            error_message = Some(format!("task {} failed: {}", task.id, resolution.note));
            break;
        }
    }

    persist(store, &mut checkpoint, paths, clock)?;

    let final_status = if error_message.is_some() {
        FinalStatus::Error
    } else if checkpoint.blocked_task_ids.is_empty() {
        FinalStatus::AllComplete
    } else {
        FinalStatus::Partial
    };
    notify("on_info", || {
        observer.on_info(&format!("run finished: {}", final_status.as_str()))
    });

    Ok(RunResult {
        completed_task_ids: checkpoint.done_task_ids.clone(),
        blocked_task_ids: checkpoint.blocked_task_ids.clone(),
        attempts: checkpoint.attempts.clone(),
        total_runs,
        final_status,
        error_message,
    })
}

/// Persist checkpoint and plan. A store that cannot list tasks only costs the
/// plan refresh, never the checkpoint.
fn persist(
    store: &dyn TaskStore,
    checkpoint: &mut Checkpoint,
    paths: &SessionPaths,
    clock: &dyn Clock,
) -> Result<()> {
    save_checkpoint(&paths.checkpoint_file, checkpoint, clock)?;
    match store.all_tasks() {
        Ok(tasks) => sync_plan(&tasks, checkpoint, paths, clock)?,
        Err(err) => warn!(error = %format!("{err:#}"), "skipping plan sync, task list unavailable"),
    }
    Ok(())
}

/// Run an observer callback, swallowing panics so a flaky observer cannot
/// poison the run.
fn notify<F: FnOnce()>(event: &str, callback: F) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        warn!(event, "observer callback panicked, continuing");
    }
}

struct ObserverSink<'a> {
    observer: &'a dyn RunObserver,
}

impl OutputSink for ObserverSink<'_> {
    fn chunk(&self, stream: StreamKind, text: &str) {
        notify("on_output", || {
            self.observer.on_output(stream, text)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RunMode;
    use crate::io::paths::PathOptions;
    use crate::test_support::{
        FailingTaskStore, FixedClock, InMemoryTaskStore, ScriptedExecutor, outcome_exit, task,
    };

    fn session(root: &std::path::Path) -> SessionPaths {
        SessionPaths::resolve(&PathOptions::new(root, RunMode::Full))
    }

    #[test]
    fn store_failure_persists_checkpoint_and_reports_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = session(temp.path());
        let executor = ScriptedExecutor::new(Vec::new());
        let clock = FixedClock::at("2026-01-02T03:04:05Z");

        let result = run(
            &FailingTaskStore,
            &executor,
            &paths,
            &RunOptions::default(),
            &clock,
            &NullObserver,
        )
        .expect("run");

        assert_eq!(result.final_status, FinalStatus::Error);
        assert!(result.error_message.expect("message").contains("task store error"));
        assert!(paths.checkpoint_file.exists());
    }

    /// The attempt cap counts executor invocations, so a retried task can
    /// consume the whole budget.
    #[test]
    fn max_tasks_caps_executor_invocations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = session(temp.path());
        let store = InMemoryTaskStore::new(vec![task("1", "a"), task("2", "b"), task("3", "c")]);
        let executor = ScriptedExecutor::new(vec![outcome_exit(0), outcome_exit(0)]);
        let clock = FixedClock::at("2026-01-02T03:04:05Z");
        let options = RunOptions {
            max_tasks: Some(2),
            ..RunOptions::default()
        };

        let result = run(&store, &executor, &paths, &options, &clock, &NullObserver)
            .expect("run");

        assert_eq!(result.total_runs, 2);
        assert_eq!(result.completed_task_ids, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(result.final_status, FinalStatus::AllComplete);
        executor.assert_drained();
    }

    #[test]
    fn panicking_observer_does_not_abort_the_run() {
        struct ExplodingObserver;
        impl RunObserver for ExplodingObserver {
            fn on_task_start(&self, _task: &Task, _attempt: u32) {
                panic!("observer bug");
            }
            fn on_task_end(&self, _summary: &TaskEndSummary) {
                panic!("observer bug");
            }
        }

        let temp = tempfile::tempdir().expect("tempdir");
        let paths = session(temp.path());
        let store = InMemoryTaskStore::new(vec![task("1", "only")]);
        let executor = ScriptedExecutor::new(vec![outcome_exit(0)]);
        let clock = FixedClock::at("2026-01-02T03:04:05Z");

        let result = run(
            &store,
            &executor,
            &paths,
            &RunOptions::default(),
            &clock,
            &ExplodingObserver,
        )
        .expect("run");

        assert_eq!(result.final_status, FinalStatus::AllComplete);
        assert_eq!(result.completed_task_ids, vec!["1".to_string()]);
    }

    /// A spawn-level executor error is a normal failed attempt, not a fatal
    /// run error.
    #[test]
    fn executor_error_counts_as_a_failed_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = session(temp.path());
        let store = InMemoryTaskStore::new(vec![task("1", "only")]);
        let executor = ScriptedExecutor::failing("spawn failed");
        let clock = FixedClock::at("2026-01-02T03:04:05Z");
        let options = RunOptions {
            max_retries: 0,
            ..RunOptions::default()
        };

        let result = run(&store, &executor, &paths, &options, &clock, &NullObserver)
            .expect("run");

        assert_eq!(result.final_status, FinalStatus::Partial);
        assert_eq!(result.blocked_task_ids, vec!["1".to_string()]);
        assert_eq!(store.status_of("1"), Some(TaskStatus::Blocked));
    }
}
