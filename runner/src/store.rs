//! Task-store seam.
//!
//! The store is an external collaborator: it decides task ordering and owns
//! task content. The runner only reads tasks and writes status transitions.

use anyhow::Result;

use crate::core::types::{Task, TaskStatus};

/// Ordered access to the external task store.
pub trait TaskStore {
    /// Next eligible task, or `None` when nothing is left to run.
    fn next_task(&self) -> Result<Option<Task>>;

    /// The full task list in store order, for plan projection.
    fn all_tasks(&self) -> Result<Vec<Task>>;

    /// Persist a status transition. The runner writes only `pending`,
    /// `in-progress`, `done`, and `blocked`.
    fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;
}
