//! Prompt assembly for one agent invocation.
//!
//! The prompt references the three context files by `@`-prefixed paths
//! relative to the project root (the agent's working directory), states the
//! single-task contract and the sentinel format, then embeds the task.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::Task;
use crate::io::paths::{SessionPaths, rel_posix};

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

/// Task fields exposed to the template.
#[derive(Debug, Clone, Serialize)]
struct TaskContext {
    id: String,
    title: String,
    description: String,
    details: Option<String>,
    test_strategy: Option<String>,
}

impl TaskContext {
    fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            details: normalize(task.details.as_deref()),
            test_strategy: normalize(task.test_strategy.as_deref()),
        }
    }
}

fn normalize(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Render the per-task prompt.
pub fn build_prompt(task: &Task, paths: &SessionPaths) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("task", TASK_TEMPLATE)
        .expect("task template should be valid");
    let template = env.get_template("task").expect("task template registered");

    let dependencies = if task.dependencies.is_empty() {
        "none".to_string()
    } else {
        task.dependencies.join(", ")
    };

    let rendered = template
        .render(context! {
            agents_ref => rel_posix(&paths.root, &paths.agents_file),
            skill_agents_ref => rel_posix(&paths.root, &paths.skill_agents_file),
            skill_ref => rel_posix(&paths.root, &paths.skill_file),
            task => TaskContext::from_task(task),
            dependencies => dependencies,
        })
        .with_context(|| format!("render prompt for task {}", task.id))?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RunMode;
    use crate::io::paths::PathOptions;

    fn paths() -> SessionPaths {
        SessionPaths::resolve(&PathOptions::new("/proj", RunMode::Full))
    }

    fn task() -> Task {
        Task {
            id: "3.2".to_string(),
            title: "Wire the codec".to_string(),
            description: "Hook the codec into the pipeline".to_string(),
            details: Some("Use the existing registry".to_string()),
            test_strategy: Some("cargo test codec".to_string()),
            dependencies: vec!["3.1".to_string(), "2".to_string()],
            ..Task::default()
        }
    }

    /// The prompt must carry the sentinel contract and the store-mutation ban.
    #[test]
    fn prompt_states_the_result_contract() {
        let prompt = build_prompt(&task(), &paths()).expect("prompt");
        assert!(prompt.contains("RESULT:"));
        assert!(prompt.contains("must not modify the external task store"));
        assert!(prompt.contains("terminate immediately"));
    }

    #[test]
    fn prompt_references_context_files_relative_to_root() {
        let prompt = build_prompt(&task(), &paths()).expect("prompt");
        assert!(prompt.starts_with("@AGENTS.md\n"));
        assert!(prompt.contains("@.codex/skills/taskmaster-longrun/AGENTS.md\n"));
        assert!(prompt.contains("@.codex/skills/taskmaster-longrun/SKILL.md\n"));
    }

    #[test]
    fn prompt_embeds_all_task_fields() {
        let prompt = build_prompt(&task(), &paths()).expect("prompt");
        assert!(prompt.contains("id: 3.2"));
        assert!(prompt.contains("title: Wire the codec"));
        assert!(prompt.contains("details: Use the existing registry"));
        assert!(prompt.contains("test strategy: cargo test codec"));
        assert!(prompt.contains("dependencies: 3.1, 2"));
    }

    #[test]
    fn empty_dependencies_render_as_none() {
        let mut bare = task();
        bare.dependencies.clear();
        bare.details = None;
        bare.test_strategy = Some("   ".to_string());
        let prompt = build_prompt(&bare, &paths()).expect("prompt");
        assert!(prompt.contains("dependencies: none"));
        assert!(!prompt.contains("details:"));
        assert!(!prompt.contains("test strategy:"));
    }
}
