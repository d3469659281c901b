//! Writes the plan projection and task-map side artifacts.
//!
//! Both files are views over the task list and checkpoint: rewritten in full
//! after every transition, never read back by the runner.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::core::checkpoint::Checkpoint;
use crate::core::clock::Clock;
use crate::core::plan::{self, PlanRow};
use crate::core::types::{RunMode, Task};
use crate::io::paths::SessionPaths;

/// Task-map file contents (`taskmaster-map.json`, full mode only).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskMapFile {
    generated_at: String,
    rows: Vec<TaskMapRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskMapRow {
    row_id: usize,
    task_id: String,
    title: String,
    dependencies: Vec<String>,
}

/// Project the task list and rewrite the plan file (and, in full mode, the
/// task-map file).
pub fn sync_plan(
    tasks: &[Task],
    checkpoint: &Checkpoint,
    paths: &SessionPaths,
    clock: &dyn Clock,
) -> Result<()> {
    let now = clock.now().to_rfc3339();
    let rows = plan::project_rows(tasks, checkpoint, &now);
    debug!(rows = rows.len(), mode = ?paths.mode, "syncing plan projection");

    match paths.mode {
        RunMode::Full => {
            write_file(&paths.plan_file, &plan::render_full(&rows))?;
            write_task_map(&paths.task_map_file, &rows, &now)?;
        }
        RunMode::Lite => {
            write_file(&paths.plan_file, &plan::render_lite(&rows))?;
        }
    }
    Ok(())
}

fn write_task_map(path: &Path, rows: &[PlanRow], now: &str) -> Result<()> {
    let map = TaskMapFile {
        generated_at: now.to_string(),
        rows: rows
            .iter()
            .map(|row| TaskMapRow {
                row_id: row.row_id,
                task_id: row.task_id.clone(),
                title: strip_display_id(&row.display, &row.task_id),
                dependencies: row.dependencies.clone(),
            })
            .collect(),
    };
    let mut buf = serde_json::to_string_pretty(&map).context("serialize task map")?;
    buf.push('\n');
    write_file(path, &buf)
}

/// Recover the bare title from the `[id] title` display cell.
fn strip_display_id(display: &str, task_id: &str) -> String {
    display
        .strip_prefix(&format!("[{task_id}] "))
        .unwrap_or(display)
        .to_string()
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
