//! Asset initialization: everything the agent needs on disk before the first
//! run. Idempotent under repeated calls.
//!
//! The runner owns a marked hook block in the project's agent-context file
//! and an integration addendum in the skill file; everything else in those
//! files belongs to the user and is never touched.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::types::{AgentsMode, RunMode};
use crate::io::paths::{SessionPaths, rel_posix};

/// Hook block delimiters in the agent-context file.
pub const HOOK_START: &str = "<!-- TM-LONGRUN-START -->";
pub const HOOK_END: &str = "<!-- TM-LONGRUN-END -->";
/// Integration-addendum delimiters in the skill file.
pub const ADDENDUM_START: &str = "<!-- TM-INTEGRATION-START -->";
pub const ADDENDUM_END: &str = "<!-- TM-INTEGRATION-END -->";

/// Heuristic marker for the upstream global-agent rules file.
const UPSTREAM_AGENTS_MARKER: &str = "# Global Agent Rules";
const GITIGNORE_CONTENTS: &str = "*\n!.gitignore\n";

const HOOK_BLOCK: &str = include_str!("templates/hook_block.md");
const SKILL_FALLBACK: &str = include_str!("templates/skill.md");
const SKILL_ADDENDUM: &str = include_str!("templates/skill_addendum.md");
const SKILL_AGENTS_FALLBACK: &str = include_str!("templates/skill_agents.md");
const SPEC_TEMPLATE: &str = include_str!("templates/spec.md");
const PROGRESS_TEMPLATE: &str = include_str!("templates/progress.md");

/// Upstream templates the initializer may fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Skill,
    SkillAgents,
}

/// Pluggable source for upstream templates. `Ok(None)` means "not available,
/// use the compiled-in fallback".
pub trait TemplateFetcher {
    fn fetch(&self, kind: TemplateKind) -> Result<Option<String>>;
}

/// Default fetcher: never goes to the network, always falls back.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteFetcher;

impl TemplateFetcher for NoRemoteFetcher {
    fn fetch(&self, _kind: TemplateKind) -> Result<Option<String>> {
        Ok(None)
    }
}

/// What `init_assets` did to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Created,
    Updated,
    Skipped,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Created => "created",
            FileAction::Updated => "updated",
            FileAction::Skipped => "skipped",
        }
    }
}

/// Per-file classification, keyed by path relative to the project root in
/// POSIX form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitResult {
    pub files: BTreeMap<String, FileAction>,
}

/// Knobs for asset initialization.
pub struct InitOptions<'a> {
    pub agents_mode: AgentsMode,
    /// When set, the fetcher is bypassed and fallbacks are used, keeping
    /// initialization deterministic.
    pub disable_remote: bool,
    pub fetcher: &'a dyn TemplateFetcher,
}

impl Default for InitOptions<'_> {
    fn default() -> Self {
        Self {
            agents_mode: AgentsMode::default(),
            disable_remote: false,
            fetcher: &NoRemoteFetcher,
        }
    }
}

/// Ensure the session directory, gitignore, hook block, skill files, and
/// (full mode) spec/progress templates exist. Safe to call repeatedly.
pub fn init_assets(paths: &SessionPaths, options: &InitOptions) -> Result<InitResult> {
    let mut result = InitResult::default();

    fs::create_dir_all(&paths.session_dir)
        .with_context(|| format!("create session directory {}", paths.session_dir.display()))?;
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("create logs directory {}", paths.logs_dir.display()))?;

    record(
        &mut result,
        paths,
        &paths.gitignore_file,
        ensure_gitignore(&paths.gitignore_file)?,
    );
    record(
        &mut result,
        paths,
        &paths.agents_file,
        ensure_hook(&paths.agents_file, options.agents_mode)?,
    );
    record(
        &mut result,
        paths,
        &paths.skill_file,
        ensure_skill(&paths.skill_file, options)?,
    );
    record(
        &mut result,
        paths,
        &paths.skill_agents_file,
        ensure_skill_agents(&paths.skill_agents_file, options)?,
    );

    if paths.mode == RunMode::Full {
        record(
            &mut result,
            paths,
            &paths.spec_file,
            write_if_missing(&paths.spec_file, SPEC_TEMPLATE)?,
        );
        record(
            &mut result,
            paths,
            &paths.progress_file,
            write_if_missing(&paths.progress_file, PROGRESS_TEMPLATE)?,
        );
    }

    info!(
        created = result
            .files
            .values()
            .filter(|a| **a == FileAction::Created)
            .count(),
        "assets initialized"
    );
    Ok(result)
}

fn record(result: &mut InitResult, paths: &SessionPaths, path: &Path, action: FileAction) {
    result.files.insert(rel_posix(&paths.root, path), action);
}

fn ensure_gitignore(path: &Path) -> Result<FileAction> {
    if path.exists() {
        return Ok(FileAction::Skipped);
    }
    write_file(path, GITIGNORE_CONTENTS)?;
    Ok(FileAction::Created)
}

/// Guarantee exactly one hook block in the agent-context file.
fn ensure_hook(path: &Path, mode: AgentsMode) -> Result<FileAction> {
    if !path.exists() {
        write_file(path, HOOK_BLOCK)?;
        debug!(path = %path.display(), "created agent-context file with hook block");
        return Ok(FileAction::Created);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    match (contents.contains(HOOK_START), contents.contains(HOOK_END)) {
        (true, true) => Ok(FileAction::Skipped),
        (false, false) => match mode {
            AgentsMode::Append => {
                let mut updated = contents;
                if !updated.ends_with('\n') {
                    updated.push('\n');
                }
                updated.push('\n');
                updated.push_str(HOOK_BLOCK);
                write_file(path, &updated)?;
                Ok(FileAction::Updated)
            }
            AgentsMode::Skip => Ok(FileAction::Skipped),
            AgentsMode::Fail => bail!(
                "hook missing from {} and agents mode is 'fail'",
                path.display()
            ),
        },
        _ => bail!(
            "corrupt hook markers in {}: one of {HOOK_START} / {HOOK_END} is missing",
            path.display()
        ),
    }
}

/// Guarantee the skill file looks like the upstream skill and carries exactly
/// one integration addendum.
fn ensure_skill(path: &Path, options: &InitOptions) -> Result<FileAction> {
    let existing = read_optional(path)?;
    if let Some(contents) = &existing {
        if has_frontmatter(contents)
            && contents.contains(ADDENDUM_START)
            && contents.contains(ADDENDUM_END)
        {
            return Ok(FileAction::Skipped);
        }
    }

    let base = fetch_or_fallback(options, TemplateKind::Skill, SKILL_FALLBACK);
    let mut rebuilt = strip_block(&base, ADDENDUM_START, ADDENDUM_END)
        .trim_end()
        .to_string();
    rebuilt.push_str("\n\n");
    rebuilt.push_str(SKILL_ADDENDUM);
    write_file(path, &rebuilt)?;
    Ok(if existing.is_some() {
        FileAction::Updated
    } else {
        FileAction::Created
    })
}

fn ensure_skill_agents(path: &Path, options: &InitOptions) -> Result<FileAction> {
    let existing = read_optional(path)?;
    if let Some(contents) = &existing {
        if contents.contains(UPSTREAM_AGENTS_MARKER) {
            return Ok(FileAction::Skipped);
        }
    }
    let template = fetch_or_fallback(options, TemplateKind::SkillAgents, SKILL_AGENTS_FALLBACK);
    write_file(path, &template)?;
    Ok(if existing.is_some() {
        FileAction::Updated
    } else {
        FileAction::Created
    })
}

fn fetch_or_fallback(options: &InitOptions, kind: TemplateKind, fallback: &str) -> String {
    if options.disable_remote {
        return fallback.to_string();
    }
    match options.fetcher.fetch(kind) {
        Ok(Some(template)) => template,
        Ok(None) => fallback.to_string(),
        Err(err) => {
            warn!(?kind, error = %err, "template fetch failed, using fallback");
            fallback.to_string()
        }
    }
}

fn has_frontmatter(contents: &str) -> bool {
    let Some(rest) = contents.strip_prefix("---\n") else {
        return false;
    };
    rest.contains("\n---")
}

/// Remove every region bounded by `start`/`end` markers, inclusive.
fn strip_block(contents: &str, start: &str, end: &str) -> String {
    let mut out = contents.to_string();
    while let (Some(s), Some(e)) = (out.find(start), out.find(end)) {
        if e < s {
            break;
        }
        let mut tail = e + end.len();
        if out[tail..].starts_with('\n') {
            tail += 1;
        }
        out.replace_range(s..tail, "");
    }
    out
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(Some(contents))
}

fn write_if_missing(path: &Path, contents: &str) -> Result<FileAction> {
    if path.exists() {
        return Ok(FileAction::Skipped);
    }
    write_file(path, contents)?;
    Ok(FileAction::Created)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RunMode;
    use crate::io::paths::PathOptions;

    fn resolve(root: &Path, mode: RunMode) -> SessionPaths {
        SessionPaths::resolve(&PathOptions::new(root, mode))
    }

    fn count_occurrences(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn init_creates_the_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = resolve(temp.path(), RunMode::Full);

        let result = init_assets(&paths, &InitOptions::default()).expect("init");

        assert!(paths.session_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_file).expect("gitignore"),
            "*\n!.gitignore\n"
        );
        assert!(paths.agents_file.is_file());
        assert!(paths.skill_file.is_file());
        assert!(paths.skill_agents_file.is_file());
        assert!(paths.spec_file.is_file());
        assert!(paths.progress_file.is_file());
        assert_eq!(
            result.files.get("AGENTS.md"),
            Some(&FileAction::Created)
        );
    }

    /// Running init twice leaves exactly one hook block, one addendum, and a
    /// single gitignore body.
    #[test]
    fn init_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = resolve(temp.path(), RunMode::Full);

        init_assets(&paths, &InitOptions::default()).expect("first init");
        let second = init_assets(&paths, &InitOptions::default()).expect("second init");

        let agents = fs::read_to_string(&paths.agents_file).expect("agents");
        assert_eq!(count_occurrences(&agents, HOOK_START), 1);
        assert_eq!(count_occurrences(&agents, HOOK_END), 1);

        let skill = fs::read_to_string(&paths.skill_file).expect("skill");
        assert_eq!(count_occurrences(&skill, ADDENDUM_START), 1);

        let gitignore = fs::read_to_string(&paths.gitignore_file).expect("gitignore");
        assert_eq!(gitignore, "*\n!.gitignore\n");

        assert!(second.files.values().all(|a| *a == FileAction::Skipped));
    }

    /// A lone start marker is corruption, regardless of agents mode.
    #[test]
    fn one_sided_marker_is_a_fatal_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("AGENTS.md"),
            format!("intro\n{HOOK_START}\nno end\n"),
        )
        .expect("write");
        let paths = resolve(temp.path(), RunMode::Full);

        for mode in [AgentsMode::Append, AgentsMode::Skip, AgentsMode::Fail] {
            let options = InitOptions {
                agents_mode: mode,
                ..InitOptions::default()
            };
            let err = init_assets(&paths, &options).unwrap_err();
            assert!(err.to_string().contains("corrupt hook markers"));
        }
    }

    #[test]
    fn append_mode_preserves_existing_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("AGENTS.md"), "# My rules\nbe kind").expect("write");
        let paths = resolve(temp.path(), RunMode::Full);

        let result = init_assets(&paths, &InitOptions::default()).expect("init");

        let agents = fs::read_to_string(&paths.agents_file).expect("agents");
        assert!(agents.starts_with("# My rules\nbe kind\n\n"));
        assert!(agents.contains(HOOK_START));
        assert_eq!(result.files.get("AGENTS.md"), Some(&FileAction::Updated));
    }

    #[test]
    fn skip_mode_leaves_a_hookless_file_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("AGENTS.md"), "just mine\n").expect("write");
        let paths = resolve(temp.path(), RunMode::Full);
        let options = InitOptions {
            agents_mode: AgentsMode::Skip,
            ..InitOptions::default()
        };

        init_assets(&paths, &options).expect("init");
        let agents = fs::read_to_string(&paths.agents_file).expect("agents");
        assert_eq!(agents, "just mine\n");
    }

    #[test]
    fn fail_mode_refuses_a_hookless_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("AGENTS.md"), "just mine\n").expect("write");
        let paths = resolve(temp.path(), RunMode::Full);
        let options = InitOptions {
            agents_mode: AgentsMode::Fail,
            ..InitOptions::default()
        };

        let err = init_assets(&paths, &options).unwrap_err();
        assert!(err.to_string().contains("hook missing"));
    }

    /// The lowercase `agent.md` spelling wins when `AGENTS.md` is absent.
    #[test]
    fn hook_lands_in_preexisting_lowercase_agent_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("agent.md"), "lower\n").expect("write");
        let paths = resolve(temp.path(), RunMode::Full);

        init_assets(&paths, &InitOptions::default()).expect("init");

        let lower = fs::read_to_string(temp.path().join("agent.md")).expect("agent.md");
        assert!(lower.contains(HOOK_START));
        assert!(!temp.path().join("AGENTS.md").exists());
    }

    #[test]
    fn foreign_skill_file_is_rebuilt_with_addendum() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = resolve(temp.path(), RunMode::Full);
        fs::create_dir_all(paths.skill_file.parent().expect("parent")).expect("mkdir");
        fs::write(&paths.skill_file, "not a skill at all\n").expect("write");

        let result = init_assets(&paths, &InitOptions::default()).expect("init");

        let skill = fs::read_to_string(&paths.skill_file).expect("skill");
        assert!(skill.starts_with("---\n"));
        assert_eq!(count_occurrences(&skill, ADDENDUM_START), 1);
        assert_eq!(
            result
                .files
                .get(".codex/skills/taskmaster-longrun/SKILL.md"),
            Some(&FileAction::Updated)
        );
    }

    #[test]
    fn injected_fetcher_supplies_the_skill_template() {
        struct CannedFetcher;
        impl TemplateFetcher for CannedFetcher {
            fn fetch(&self, kind: TemplateKind) -> Result<Option<String>> {
                Ok(match kind {
                    TemplateKind::Skill => {
                        Some("---\nname: upstream\n---\n\n# Upstream Skill\n".to_string())
                    }
                    TemplateKind::SkillAgents => None,
                })
            }
        }

        let temp = tempfile::tempdir().expect("tempdir");
        let paths = resolve(temp.path(), RunMode::Full);
        let options = InitOptions {
            fetcher: &CannedFetcher,
            ..InitOptions::default()
        };

        init_assets(&paths, &options).expect("init");
        let skill = fs::read_to_string(&paths.skill_file).expect("skill");
        assert!(skill.contains("# Upstream Skill"));
        assert!(skill.contains(ADDENDUM_START));
    }

    #[test]
    fn disable_remote_bypasses_the_fetcher() {
        struct PanickyFetcher;
        impl TemplateFetcher for PanickyFetcher {
            fn fetch(&self, _kind: TemplateKind) -> Result<Option<String>> {
                panic!("fetcher must not be called when remote is disabled");
            }
        }

        let temp = tempfile::tempdir().expect("tempdir");
        let paths = resolve(temp.path(), RunMode::Full);
        let options = InitOptions {
            disable_remote: true,
            fetcher: &PanickyFetcher,
            ..InitOptions::default()
        };

        init_assets(&paths, &options).expect("init");
        let skill = fs::read_to_string(&paths.skill_file).expect("skill");
        assert!(skill.contains("taskmaster-longrun"));
    }

    /// Lite mode skips the spec and progress templates entirely.
    #[test]
    fn lite_mode_writes_no_templates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = resolve(temp.path(), RunMode::Lite);

        init_assets(&paths, &InitOptions::default()).expect("init");

        assert!(!paths.spec_file.exists());
        assert!(!paths.progress_file.exists());
    }

    #[test]
    fn strip_block_removes_nested_addendum_region() {
        let body = format!("head\n{ADDENDUM_START}\nold\n{ADDENDUM_END}\ntail\n");
        assert_eq!(strip_block(&body, ADDENDUM_START, ADDENDUM_END), "head\ntail\n");
    }
}
