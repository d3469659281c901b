//! Plan projection: a tabular, human-auditable view of the task list.
//!
//! The plan file is a view, not a source of truth. It is recomputed in full
//! from the task list and the checkpoint after every transition. Rendering is
//! deterministic for a fixed clock.

use crate::core::checkpoint::Checkpoint;
use crate::core::types::{Task, TaskStatus};

/// Constant placeholder emitted in the full plan's validation column.
pub const VALIDATION_PLACEHOLDER: &str = "echo SKIP";

const FULL_HEADER: &str =
    "id,task,status,acceptance_criteria,validation_command,completed_at,retry_count,notes";
const LITE_HEADER: &str = "id,task,status,completed_at,notes";
const BLOCKED_NOTE: &str = "blocked by retry limit";

/// Projected status of one plan row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Todo,
    InProgress,
    Done,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Todo => "TODO",
            PlanStatus::InProgress => "IN_PROGRESS",
            PlanStatus::Done => "DONE",
            PlanStatus::Failed => "FAILED",
        }
    }
}

/// One projected row: a task or a subtask flattened into the plan table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRow {
    /// Dense 1-based row id across tasks and subtasks.
    pub row_id: usize,
    /// The underlying task id (synthesized `"<parent>.<sub>"` for subtasks).
    pub task_id: String,
    /// Display cell embedding the task id and title.
    pub display: String,
    pub status: PlanStatus,
    /// Acceptance text taken from the task's test strategy.
    pub acceptance: String,
    /// Completion timestamp, present exactly when `status` is `Done`.
    pub completed_at: Option<String>,
    pub retry_count: u32,
    pub notes: String,
    pub dependencies: Vec<String>,
}

/// Walk the task list in order and flatten it into plan rows: each task, then
/// each of its subtasks. `completed_at` is the timestamp stamped onto rows
/// projected as done.
pub fn project_rows(tasks: &[Task], checkpoint: &Checkpoint, completed_at: &str) -> Vec<PlanRow> {
    let mut rows = Vec::new();
    for task in tasks {
        push_row(
            &mut rows,
            &task.id,
            task,
            task.dependencies.clone(),
            checkpoint,
            completed_at,
        );
        for subtask in &task.subtasks {
            let sub_id = subtask_id(&task.id, &subtask.id);
            let deps = subtask
                .dependencies
                .iter()
                .map(|dep| rewrite_subtask_dep(&task.id, dep))
                .collect();
            push_row(&mut rows, &sub_id, subtask, deps, checkpoint, completed_at);
        }
    }
    rows
}

/// Render the full (wide) plan schema.
pub fn render_full(rows: &[PlanRow]) -> String {
    let mut out = String::from(FULL_HEADER);
    out.push('\n');
    for row in rows {
        let cells = [
            row.row_id.to_string(),
            row.display.clone(),
            row.status.as_str().to_string(),
            row.acceptance.clone(),
            VALIDATION_PLACEHOLDER.to_string(),
            row.completed_at.clone().unwrap_or_default(),
            row.retry_count.to_string(),
            row.notes.clone(),
        ];
        push_record(&mut out, &cells);
    }
    out
}

/// Render the lite plan schema. Status collapses to `DONE`/`TODO`.
pub fn render_lite(rows: &[PlanRow]) -> String {
    let mut out = String::from(LITE_HEADER);
    out.push('\n');
    for row in rows {
        let status = if row.status == PlanStatus::Done {
            PlanStatus::Done
        } else {
            PlanStatus::Todo
        };
        let cells = [
            row.row_id.to_string(),
            row.display.clone(),
            status.as_str().to_string(),
            row.completed_at.clone().unwrap_or_default(),
            row.notes.clone(),
        ];
        push_record(&mut out, &cells);
    }
    out
}

/// Synthesized id for a subtask of `parent`.
pub fn subtask_id(parent: &str, sub: &str) -> String {
    format!("{parent}.{sub}")
}

/// Subtask dependencies without a dot are sibling references and are
/// qualified with the parent id.
fn rewrite_subtask_dep(parent: &str, dep: &str) -> String {
    if dep.contains('.') {
        dep.to_string()
    } else {
        format!("{parent}.{dep}")
    }
}

fn push_row(
    rows: &mut Vec<PlanRow>,
    id: &str,
    task: &Task,
    dependencies: Vec<String>,
    checkpoint: &Checkpoint,
    completed_at: &str,
) {
    let status = project_status(id, task.status, checkpoint);
    rows.push(PlanRow {
        row_id: rows.len() + 1,
        task_id: id.to_string(),
        display: format!("[{id}] {}", task.title),
        status,
        acceptance: task.test_strategy.clone().unwrap_or_default(),
        completed_at: (status == PlanStatus::Done).then(|| completed_at.to_string()),
        retry_count: checkpoint.attempts_for(id),
        notes: if checkpoint.is_blocked(id) {
            BLOCKED_NOTE.to_string()
        } else {
            String::new()
        },
        dependencies,
    });
}

/// Status precedence: checkpoint verdicts first, then the store's own status.
fn project_status(id: &str, underlying: TaskStatus, checkpoint: &Checkpoint) -> PlanStatus {
    if checkpoint.is_done(id) {
        return PlanStatus::Done;
    }
    if checkpoint.is_blocked(id) {
        return PlanStatus::Failed;
    }
    match underlying {
        TaskStatus::Done | TaskStatus::Completed => PlanStatus::Done,
        TaskStatus::InProgress => PlanStatus::InProgress,
        TaskStatus::Blocked | TaskStatus::Cancelled | TaskStatus::Deferred => PlanStatus::Failed,
        TaskStatus::Pending | TaskStatus::Review => PlanStatus::Todo,
    }
}

fn push_record(out: &mut String, cells: &[String]) {
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_cell(cell));
    }
    out.push('\n');
}

/// CSV cells are quoted iff they contain `"` or `,`. Embedded newlines are
/// flattened to spaces before quoting; embedded quotes are doubled.
fn escape_cell(cell: &str) -> String {
    let flat = cell.replace(['\n', '\r'], " ");
    if flat.contains('"') || flat.contains(',') {
        format!("\"{}\"", flat.replace('"', "\"\""))
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, title: &str, status: TaskStatus) -> Task {
        Task {
            id: id.to_string(),
            title: title.to_string(),
            status,
            ..Task::default()
        }
    }

    const NOW: &str = "2026-01-02T03:04:05+00:00";

    #[test]
    fn rows_are_dense_across_tasks_and_subtasks() {
        let mut parent = task("1", "parent", TaskStatus::Pending);
        parent.subtasks = vec![
            task("1", "sub one", TaskStatus::Pending),
            task("2", "sub two", TaskStatus::Pending),
        ];
        let tasks = vec![parent, task("2", "second", TaskStatus::Pending)];

        let rows = project_rows(&tasks, &Checkpoint::default(), NOW);
        let ids: Vec<(usize, &str)> = rows
            .iter()
            .map(|r| (r.row_id, r.task_id.as_str()))
            .collect();
        assert_eq!(ids, vec![(1, "1"), (2, "1.1"), (3, "1.2"), (4, "2")]);
    }

    #[test]
    fn subtask_sibling_deps_are_qualified() {
        let mut parent = task("3", "parent", TaskStatus::Pending);
        let mut sub = task("2", "sub", TaskStatus::Pending);
        sub.dependencies = vec!["1".to_string(), "2.4".to_string()];
        parent.subtasks = vec![sub];

        let rows = project_rows(&[parent], &Checkpoint::default(), NOW);
        assert_eq!(rows[1].dependencies, vec!["3.1".to_string(), "2.4".to_string()]);
    }

    /// Checkpoint verdicts shadow whatever the store says.
    #[test]
    fn status_precedence_puts_checkpoint_first() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.begin_attempt("1");
        checkpoint.record_done("1");
        checkpoint.begin_attempt("2");
        checkpoint.record_blocked("2");

        let tasks = vec![
            task("1", "done by runner", TaskStatus::Pending),
            task("2", "blocked by runner", TaskStatus::Done),
            task("3", "store done", TaskStatus::Completed),
            task("4", "store running", TaskStatus::InProgress),
            task("5", "store deferred", TaskStatus::Deferred),
            task("6", "untouched", TaskStatus::Review),
        ];
        let rows = project_rows(&tasks, &checkpoint, NOW);
        let statuses: Vec<PlanStatus> = rows.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                PlanStatus::Done,
                PlanStatus::Failed,
                PlanStatus::Done,
                PlanStatus::InProgress,
                PlanStatus::Failed,
                PlanStatus::Todo,
            ]
        );
    }

    #[test]
    fn completed_at_is_set_only_for_done_rows() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.begin_attempt("1");
        checkpoint.record_done("1");
        let tasks = vec![
            task("1", "done", TaskStatus::Pending),
            task("2", "open", TaskStatus::Pending),
        ];

        let rows = project_rows(&tasks, &checkpoint, NOW);
        assert_eq!(rows[0].completed_at.as_deref(), Some(NOW));
        assert_eq!(rows[0].retry_count, 1);
        assert!(rows[1].completed_at.is_none());
    }

    #[test]
    fn blocked_rows_carry_the_retry_note() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.begin_attempt("1");
        checkpoint.record_blocked("1");
        let rows = project_rows(&[task("1", "stuck", TaskStatus::Pending)], &checkpoint, NOW);
        assert_eq!(rows[0].notes, "blocked by retry limit");
        assert_eq!(rows[0].status, PlanStatus::Failed);
    }

    #[test]
    fn full_render_quotes_commas_and_doubles_quotes() {
        let tasks = vec![task("1", "tricky, \"quoted\"\ntitle", TaskStatus::Pending)];
        let csv = render_full(&project_rows(&tasks, &Checkpoint::default(), NOW));
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("id,task,status,acceptance_criteria,validation_command,completed_at,retry_count,notes")
        );
        assert_eq!(
            lines.next(),
            Some("1,\"[1] tricky, \"\"quoted\"\" title\",TODO,,echo SKIP,,0,")
        );
        assert!(csv.ends_with('\n'));
    }

    #[test]
    fn lite_render_collapses_non_done_statuses() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.begin_attempt("2");
        checkpoint.record_blocked("2");
        let tasks = vec![
            task("1", "running", TaskStatus::InProgress),
            task("2", "stuck", TaskStatus::Pending),
            task("3", "finished", TaskStatus::Done),
        ];
        let csv = render_lite(&project_rows(&tasks, &checkpoint, NOW));
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "id,task,status,completed_at,notes");
        assert_eq!(lines[1], "1,[1] running,TODO,,");
        assert_eq!(lines[2], "2,[2] stuck,TODO,,blocked by retry limit");
        assert_eq!(lines[3], format!("3,[3] finished,DONE,{NOW},"));
    }

    /// Identical inputs yield byte-identical output.
    #[test]
    fn rendering_is_deterministic() {
        let tasks = vec![task("1", "alpha", TaskStatus::Pending)];
        let checkpoint = Checkpoint::default();
        let first = render_full(&project_rows(&tasks, &checkpoint, NOW));
        let second = render_full(&project_rows(&tasks, &checkpoint, NOW));
        assert_eq!(first, second);
    }
}
