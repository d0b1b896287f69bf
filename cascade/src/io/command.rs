//! Command artifacts handed to the agent when a phase is armed.
//!
//! Each phase gets `.cascade/phases/phase-<id>-tasks.md` with the full task
//! bodies, and `.cascade/command.md` is replaced with instructions that point
//! at it and describe the status record to write back.

use std::path::PathBuf;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::{debug, instrument};

use super::init::WorkflowPaths;
use crate::session::Phase;

const COMMAND_TEMPLATE: &str = include_str!("templates/command.md");
const PHASE_TASKS_TEMPLATE: &str = include_str!("templates/phase_tasks.md");

/// Everything needed to render one phase's artifacts.
#[derive(Debug, Clone)]
pub struct CommandRequest<'a> {
    pub paths: &'a WorkflowPaths,
    pub session_id: &'a str,
    pub phase: &'a Phase,
    /// 1-based position of the phase in the session.
    pub phase_number: usize,
    pub total_phases: usize,
    /// Failure that triggered this attempt, shown to the agent on retries.
    pub previous_error: Option<&'a str>,
}

/// Writes the agent-facing artifacts for a phase.
pub trait CommandEmitter: Send + Sync {
    /// Returns the path of the command file the agent should read.
    fn emit(&self, request: &CommandRequest<'_>) -> Result<PathBuf>;
}

#[derive(Debug, Serialize)]
struct TaskView<'a> {
    id: &'a str,
    title: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct PhaseView<'a> {
    id: &'a str,
    estimated_tokens: usize,
    task_ids: Vec<&'a str>,
    tasks: Vec<TaskView<'a>>,
}

impl<'a> PhaseView<'a> {
    fn from_phase(phase: &'a Phase) -> Self {
        Self {
            id: &phase.id,
            estimated_tokens: phase.estimated_tokens(),
            task_ids: phase.task_ids(),
            tasks: phase
                .tasks
                .iter()
                .map(|task| TaskView {
                    id: &task.id,
                    title: &task.title,
                    content: &task.content,
                })
                .collect(),
        }
    }
}

/// Markdown artifacts rendered with minijinja.
pub struct MarkdownEmitter {
    env: Environment<'static>,
}

impl MarkdownEmitter {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("command", COMMAND_TEMPLATE)
            .expect("command template should be valid");
        env.add_template("phase_tasks", PHASE_TASKS_TEMPLATE)
            .expect("phase_tasks template should be valid");
        Self { env }
    }

    pub fn render_phase_tasks(&self, phase: &Phase) -> Result<String> {
        let template = self.env.get_template("phase_tasks")?;
        let rendered = template
            .render(context! { phase => PhaseView::from_phase(phase) })
            .with_context(|| format!("render tasks for phase {}", phase.id))?;
        Ok(rendered)
    }

    pub fn render_command(&self, request: &CommandRequest<'_>) -> Result<String> {
        let tasks_path = request.paths.phase_tasks_path(&request.phase.id);
        let template = self.env.get_template("command")?;
        let rendered = template
            .render(context! {
                phase => PhaseView::from_phase(request.phase),
                phase_number => request.phase_number,
                total_phases => request.total_phases,
                session_id => request.session_id,
                tasks_file => request.paths.relative(&tasks_path).display().to_string(),
                status_file => request.paths.relative(&request.paths.handshake_path).display().to_string(),
                attempt => request.phase.retry_count,
                last_error => request.previous_error,
            })
            .with_context(|| format!("render command for phase {}", request.phase.id))?;
        Ok(rendered)
    }
}

impl Default for MarkdownEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandEmitter for MarkdownEmitter {
    #[instrument(skip_all, fields(phase_id = %request.phase.id))]
    fn emit(&self, request: &CommandRequest<'_>) -> Result<PathBuf> {
        let tasks_path = request.paths.phase_tasks_path(&request.phase.id);
        super::write_atomic(&tasks_path, &self.render_phase_tasks(request.phase)?)?;
        super::write_atomic(&request.paths.command_path, &self.render_command(request)?)?;
        debug!(command = %request.paths.command_path.display(), "command artifacts written");
        Ok(request.paths.command_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::test_support::{phase_with_tasks, task};

    #[test]
    fn emits_tasks_file_and_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = WorkflowPaths::new(temp.path());
        let mut first = task("B1", 10);
        first.content = "### Task B1: Add parser\nparse things".to_string();
        let phase = phase_with_tasks("B", vec![first, task("B2", 5)]);

        let emitter = MarkdownEmitter::new();
        let command_path = emitter
            .emit(&CommandRequest {
                paths: &paths,
                session_id: "session-1",
                phase: &phase,
                phase_number: 2,
                total_phases: 3,
                previous_error: None,
            })
            .expect("emit");

        let tasks = fs::read_to_string(paths.phase_tasks_path("B")).expect("tasks file");
        assert!(tasks.starts_with("# Phase B Tasks"));
        assert!(tasks.contains("**Total Tasks:** 2"));
        assert!(tasks.contains("### Task B1: Add parser\nparse things"));

        let command = fs::read_to_string(command_path).expect("command file");
        assert!(command.starts_with("# Execute Phase B (2 of 3)"));
        assert!(command.contains("`.cascade/phases/phase-b-tasks.md`"));
        assert!(command.contains("`.cascade/status.json`"));
        assert!(command.contains("(B1, B2)"));
        assert!(!command.contains("This is retry"));
    }

    #[test]
    fn retry_command_includes_previous_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = WorkflowPaths::new(temp.path());
        let mut phase = phase_with_tasks("A", vec![task("A1", 1)]);
        phase.retry_count = 1;

        let command = MarkdownEmitter::new()
            .render_command(&CommandRequest {
                paths: &paths,
                session_id: "session-1",
                phase: &phase,
                phase_number: 1,
                total_phases: 1,
                previous_error: Some("tests failed to compile"),
            })
            .expect("render");
        assert!(command.contains("This is retry 1 of this phase"));
        assert!(command.contains("> tests failed to compile"));
    }
}
