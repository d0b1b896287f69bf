//! Canonical `.cascade/` layout and `cascade init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{CascadeConfig, write_config};
use super::handshake::{StatusRecord, write_status};

/// All canonical paths within `.cascade/` for a project root.
#[derive(Debug, Clone)]
pub struct WorkflowPaths {
    pub root: PathBuf,
    pub cascade_dir: PathBuf,
    pub phases_dir: PathBuf,
    pub history_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub command_path: PathBuf,
    pub handshake_path: PathBuf,
    pub session_path: PathBuf,
    pub activity_path: PathBuf,
}

impl WorkflowPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let cascade_dir = root.join(".cascade");
        Self {
            root: root.clone(),
            cascade_dir: cascade_dir.clone(),
            phases_dir: cascade_dir.join("phases"),
            history_dir: cascade_dir.join("history"),
            logs_dir: cascade_dir.join("logs"),
            gitignore_path: cascade_dir.join(".gitignore"),
            config_path: cascade_dir.join("config.toml"),
            command_path: cascade_dir.join("command.md"),
            handshake_path: cascade_dir.join("status.json"),
            session_path: cascade_dir.join("session.json"),
            activity_path: cascade_dir.join("activity.json"),
        }
    }

    /// Per-phase task file, e.g. `.cascade/phases/phase-b-tasks.md`.
    pub fn phase_tasks_path(&self, phase_id: &str) -> PathBuf {
        self.phases_dir
            .join(format!("phase-{}-tasks.md", phase_id.to_lowercase()))
    }

    /// Test output log for one phase attempt.
    pub fn test_log_path(&self, phase_id: &str, attempt: u32) -> PathBuf {
        self.logs_dir
            .join(format!("phase-{}-tests-{attempt}.log", phase_id.to_lowercase()))
    }

    /// Path relative to the project root, for display in artifacts.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

/// Options for `init_workflow`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing cascade-owned files. The plan is never overwritten.
    pub force: bool,
}

/// Create `.cascade/` scaffolding in `root`.
///
/// Fails if `.cascade/` already exists unless `options.force` is set.
pub fn init_workflow(root: &Path, options: &InitOptions) -> Result<WorkflowPaths> {
    let paths = WorkflowPaths::new(root);
    if paths.cascade_dir.exists() && !paths.cascade_dir.is_dir() {
        return Err(anyhow!("cascade init: .cascade exists but is not a directory"));
    }
    if paths.cascade_dir.exists() && !options.force {
        return Err(anyhow!(
            "cascade init: .cascade already exists (use --force to overwrite)"
        ));
    }

    for dir in [
        &paths.cascade_dir,
        &paths.phases_dir,
        &paths.history_dir,
        &paths.logs_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    let config = CascadeConfig::default();
    write_config(&paths.config_path, &config)?;
    fs::write(&paths.gitignore_path, CASCADE_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_status(&paths.handshake_path, &StatusRecord::idle())?;

    let plan_path = root.join(&config.plan_file);
    if !plan_path.exists() {
        fs::write(&plan_path, PLAN_PLACEHOLDER)
            .with_context(|| format!("write file {}", plan_path.display()))?;
    }

    Ok(paths)
}

const CASCADE_GITIGNORE: &str = "\
*.tmp
activity.json
command.md
history/
logs/
phases/
session.json
status.json
";

const PLAN_PLACEHOLDER: &str = "\
# Plan

## Phase A: First steps

### Task A1: Describe the first task
What to change and how to verify it.
";

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies init_workflow creates the directory structure and seed files.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workflow(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.phases_dir.is_dir());
        assert!(paths.history_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
        assert!(paths.config_path.is_file());
        assert!(paths.handshake_path.is_file());
        assert!(paths.cascade_dir.join("planning.md").is_file());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read"),
            CASCADE_GITIGNORE
        );
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workflow(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_workflow(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    /// Force rewrites the config but keeps the user's plan.
    #[test]
    fn init_with_force_keeps_plan() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workflow(temp.path(), &InitOptions { force: false }).expect("init");
        let plan_path = paths.cascade_dir.join("planning.md");
        fs::write(&plan_path, "### Task A1: mine\n").expect("write plan");
        fs::write(&paths.config_path, "max_retries = 9\n").expect("write config");

        init_workflow(temp.path(), &InitOptions { force: true }).expect("re-init");

        assert_eq!(fs::read_to_string(&plan_path).expect("read"), "### Task A1: mine\n");
        assert!(!fs::read_to_string(&paths.config_path)
            .expect("read")
            .contains("max_retries = 9"));
    }

    #[test]
    fn phase_paths_use_lowercase_ids() {
        let paths = WorkflowPaths::new("/project");
        assert_eq!(
            paths.phase_tasks_path("AB"),
            PathBuf::from("/project/.cascade/phases/phase-ab-tasks.md")
        );
        assert_eq!(
            paths.relative(&paths.command_path),
            Path::new(".cascade/command.md")
        );
    }
}
