//! File-backed task store over a Taskmaster-style `tasks.json`.
//!
//! Supports the tagged layout (`{"master": {"tasks": [...]}}`) and the flat
//! layout (`{"tasks": [...]}`). Unknown fields are preserved verbatim: the
//! file is parsed into a JSON tree, only `status` fields are mutated, and the
//! whole tree is written back atomically.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::debug;

use crate::core::types::{Task, TaskStatus};
use crate::store::TaskStore;

pub const DEFAULT_TAG: &str = "master";

/// Task store reading and writing a `tasks.json` file.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    path: PathBuf,
    tag: String,
}

impl FileTaskStore {
    pub fn new(path: impl Into<PathBuf>, tag: Option<String>) -> Self {
        Self {
            path: path.into(),
            tag: tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
        }
    }

    fn load(&self) -> Result<Value> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read task file {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse task file {}", self.path.display()))
    }

    fn save(&self, root: &Value) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(root).context("serialize task file")?;
        buf.push('\n');
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &buf)
            .with_context(|| format!("write temp task file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace task file {}", self.path.display()))?;
        Ok(())
    }

    /// The `tasks` array for the active tag, flat layouts included.
    fn tasks_slot<'a>(&self, root: &'a mut Value) -> Result<&'a mut Vec<Value>> {
        let container = if root.get("tasks").is_some() {
            root
        } else {
            root.get_mut(&self.tag)
                .ok_or_else(|| anyhow!("tag '{}' not found in {}", self.tag, self.path.display()))?
        };
        container
            .get_mut("tasks")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| anyhow!("no tasks array in {}", self.path.display()))
    }

    fn tasks(&self) -> Result<(Value, Vec<Task>)> {
        let mut root = self.load()?;
        let tasks = self
            .tasks_slot(&mut root)?
            .iter()
            .map(task_from_value)
            .collect::<Result<Vec<Task>>>()?;
        Ok((root, tasks))
    }
}

impl TaskStore for FileTaskStore {
    /// First task, in store order, that is pending (or resuming from
    /// in-progress) with every dependency finished.
    fn next_task(&self) -> Result<Option<Task>> {
        let (_, tasks) = self.tasks()?;
        let next = tasks
            .iter()
            .find(|task| {
                matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress)
                    && task.dependencies.iter().all(|dep| {
                        tasks
                            .iter()
                            .any(|t| &t.id == dep && t.status.is_finished())
                    })
            })
            .cloned();
        debug!(next = ?next.as_ref().map(|t| t.id.clone()), "selected next task");
        Ok(next)
    }

    fn all_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.tasks()?.1)
    }

    fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let mut root = self.load()?;
        {
            let tasks = self.tasks_slot(&mut root)?;
            let slot = find_status_slot(tasks, task_id)
                .ok_or_else(|| anyhow!("task '{task_id}' not found in {}", self.path.display()))?;
            *slot = Value::String(status.as_str().to_string());
        }
        self.save(&root)
    }
}

/// Locate the `status` field for `task_id`, descending into subtasks for
/// dotted ids like `"3.2"`.
fn find_status_slot<'a>(tasks: &'a mut Vec<Value>, task_id: &str) -> Option<&'a mut Value> {
    let (parent_id, sub_id) = match task_id.split_once('.') {
        Some((parent, sub)) => (parent, Some(sub)),
        None => (task_id, None),
    };
    let parent = tasks
        .iter_mut()
        .find(|task| id_matches(task.get("id"), parent_id))?;
    let target = match sub_id {
        None => parent,
        Some(sub) => parent
            .get_mut("subtasks")?
            .as_array_mut()?
            .iter_mut()
            .find(|task| id_matches(task.get("id"), sub))?,
    };
    let object = target.as_object_mut()?;
    Some(
        object
            .entry("status")
            .or_insert(Value::String("pending".to_string())),
    )
}

fn id_matches(id: Option<&Value>, expected: &str) -> bool {
    id.and_then(id_to_string).as_deref() == Some(expected)
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn task_from_value(value: &Value) -> Result<Task> {
    let object = value.as_object().context("task entry must be an object")?;
    let id = object
        .get("id")
        .and_then(id_to_string)
        .context("task entry missing id")?;

    let status = match object.get("status") {
        None | Some(Value::Null) => TaskStatus::Pending,
        Some(value) => serde_json::from_value(value.clone())
            .with_context(|| format!("task '{id}' has an unknown status"))?,
    };
    let dependencies = match object.get("dependencies") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(deps)) => deps.iter().filter_map(id_to_string).collect(),
        Some(other) => bail!("task '{id}' dependencies must be an array, got {other}"),
    };
    let subtasks = match object.get("subtasks") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(subs)) => subs
            .iter()
            .map(task_from_value)
            .collect::<Result<Vec<Task>>>()?,
        Some(other) => bail!("task '{id}' subtasks must be an array, got {other}"),
    };

    Ok(Task {
        id,
        title: string_field(object, "title"),
        description: string_field(object, "description"),
        details: optional_field(object, "details"),
        test_strategy: optional_field(object, "testStrategy"),
        dependencies,
        status,
        subtasks,
    })
}

fn string_field(object: &serde_json::Map<String, Value>, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn optional_field(object: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Default location of the Taskmaster task file under a project root.
pub fn default_task_file(root: &Path) -> PathBuf {
    root.join(".taskmaster").join("tasks").join("tasks.json")
}
