//! Canonical session file locations derived from the project root.

use std::path::{Path, PathBuf};

use crate::core::types::RunMode;

/// Default session directory under the project root.
pub const SESSION_DIR: &str = ".codex-tasks/taskmaster-longrun";
/// Default skill file under the project root.
pub const SKILL_FILE: &str = ".codex/skills/taskmaster-longrun/SKILL.md";

/// Inputs for path resolution. Optional overrides are resolved against the
/// project root when relative.
#[derive(Debug, Clone)]
pub struct PathOptions {
    pub root: PathBuf,
    pub mode: RunMode,
    pub agents_file: Option<PathBuf>,
    pub skill_file: Option<PathBuf>,
    pub session_dir: Option<PathBuf>,
}

impl PathOptions {
    pub fn new(root: impl Into<PathBuf>, mode: RunMode) -> Self {
        Self {
            root: root.into(),
            mode,
            agents_file: None,
            skill_file: None,
            session_dir: None,
        }
    }
}

/// All fully-resolved session paths for one project.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub root: PathBuf,
    pub mode: RunMode,
    /// Project-root context file the agent reads first; the runner edits it
    /// only inside the hook block.
    pub agents_file: PathBuf,
    /// `AGENTS.md` sibling of the skill file.
    pub skill_agents_file: PathBuf,
    pub skill_file: PathBuf,
    pub session_dir: PathBuf,
    pub gitignore_file: PathBuf,
    pub spec_file: PathBuf,
    pub progress_file: PathBuf,
    /// Plan location depends on mode: lite at the project root, full inside
    /// the session directory.
    pub plan_file: PathBuf,
    pub task_map_file: PathBuf,
    pub checkpoint_file: PathBuf,
    pub ledger_file: PathBuf,
    pub logs_dir: PathBuf,
}

impl SessionPaths {
    pub fn resolve(options: &PathOptions) -> Self {
        let root = options.root.clone();
        let session_dir = options
            .session_dir
            .as_ref()
            .map(|dir| resolve_against(&root, dir))
            .unwrap_or_else(|| root.join(SESSION_DIR));
        let skill_file = options
            .skill_file
            .as_ref()
            .map(|file| resolve_against(&root, file))
            .unwrap_or_else(|| root.join(SKILL_FILE));
        let skill_agents_file = skill_file
            .parent()
            .map(|dir| dir.join("AGENTS.md"))
            .unwrap_or_else(|| root.join("AGENTS.md"));
        let agents_file = options
            .agents_file
            .as_ref()
            .map(|file| resolve_against(&root, file))
            .unwrap_or_else(|| default_agents_file(&root));
        let plan_file = match options.mode {
            RunMode::Lite => root.join("TODO.csv"),
            RunMode::Full => session_dir.join("taskmaster-plan.csv"),
        };

        Self {
            root: root.clone(),
            mode: options.mode,
            agents_file,
            skill_agents_file,
            skill_file,
            gitignore_file: root.join(".codex-tasks").join(".gitignore"),
            spec_file: session_dir.join("SPEC.md"),
            progress_file: session_dir.join("PROGRESS.md"),
            plan_file,
            task_map_file: session_dir.join("taskmaster-map.json"),
            checkpoint_file: session_dir.join("checkpoint.json"),
            ledger_file: session_dir.join("ledger.jsonl"),
            logs_dir: session_dir.join("logs"),
            session_dir,
        }
    }

    /// Per-attempt log file path for a task.
    pub fn attempt_log(&self, task_id: &str, attempt: u32) -> PathBuf {
        self.logs_dir
            .join(format!("{}-attempt-{attempt}.log", sanitize_id(task_id)))
    }
}

/// Agent-context default: `AGENTS.md` if present, else `agent.md` if present,
/// else `AGENTS.md`.
fn default_agents_file(root: &Path) -> PathBuf {
    let upper = root.join("AGENTS.md");
    if upper.exists() {
        return upper;
    }
    let lower = root.join("agent.md");
    if lower.exists() {
        return lower;
    }
    upper
}

fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// POSIX forward-slash rendering used for path comparisons and display.
pub fn posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// POSIX rendering of `path` relative to `root`, falling back to the absolute
/// form when `path` lies outside `root`.
pub fn rel_posix(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => posix(rel),
        Err(_) => posix(path),
    }
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_` so task ids are
/// safe in log file names.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn defaults_land_under_the_session_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SessionPaths::resolve(&PathOptions::new(temp.path(), RunMode::Full));

        assert_eq!(paths.session_dir, temp.path().join(SESSION_DIR));
        assert_eq!(paths.checkpoint_file, paths.session_dir.join("checkpoint.json"));
        assert_eq!(paths.ledger_file, paths.session_dir.join("ledger.jsonl"));
        assert_eq!(paths.logs_dir, paths.session_dir.join("logs"));
        assert_eq!(paths.plan_file, paths.session_dir.join("taskmaster-plan.csv"));
        assert_eq!(paths.skill_file, temp.path().join(SKILL_FILE));
        assert_eq!(
            paths.skill_agents_file,
            temp.path().join(".codex/skills/taskmaster-longrun/AGENTS.md")
        );
        assert_eq!(
            paths.gitignore_file,
            temp.path().join(".codex-tasks/.gitignore")
        );
    }

    #[test]
    fn lite_mode_places_the_plan_at_the_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SessionPaths::resolve(&PathOptions::new(temp.path(), RunMode::Lite));
        assert_eq!(paths.plan_file, temp.path().join("TODO.csv"));
    }

    /// A pre-existing lowercase `agent.md` wins over a missing `AGENTS.md`.
    #[test]
    fn lowercase_agent_file_is_picked_when_it_exists() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("agent.md"), "hi\n").expect("write");
        let paths = SessionPaths::resolve(&PathOptions::new(temp.path(), RunMode::Full));
        assert_eq!(paths.agents_file, temp.path().join("agent.md"));
    }

    #[test]
    fn uppercase_agents_file_wins_when_both_exist() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("AGENTS.md"), "hi\n").expect("write");
        fs::write(temp.path().join("agent.md"), "hi\n").expect("write");
        let paths = SessionPaths::resolve(&PathOptions::new(temp.path(), RunMode::Full));
        assert_eq!(paths.agents_file, temp.path().join("AGENTS.md"));
    }

    #[test]
    fn relative_overrides_resolve_against_the_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut options = PathOptions::new(temp.path(), RunMode::Full);
        options.session_dir = Some(PathBuf::from("work/session"));
        options.agents_file = Some(PathBuf::from("docs/CONTEXT.md"));
        let paths = SessionPaths::resolve(&options);
        assert_eq!(paths.session_dir, temp.path().join("work/session"));
        assert_eq!(paths.agents_file, temp.path().join("docs/CONTEXT.md"));
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_id("3.2"), "3.2");
        assert_eq!(sanitize_id("api/v2 #1"), "api_v2__1");
        assert_eq!(sanitize_id("ok_task-1"), "ok_task-1");
    }

    #[test]
    fn rel_posix_uses_forward_slashes() {
        let root = Path::new("/proj");
        assert_eq!(rel_posix(root, Path::new("/proj/a/b.md")), "a/b.md");
        assert_eq!(rel_posix(root, Path::new("/other/x")), "/other/x");
    }
}
