//! Git adapter used to commit (and optionally push) each completed phase.
//!
//! A small, explicit wrapper around `git` subprocess calls; no libgit bindings.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Full SHA of HEAD.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes. Returns `false` and does nothing when nothing is staged.
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Push the current branch to `remote`.
    pub fn push(&self, remote: &str) -> Result<()> {
        self.run_checked(&["push", remote, "HEAD"])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub workdir: PathBuf,
    pub message: String,
    pub push: bool,
    pub remote: String,
}

/// Records a completed phase in source control.
pub trait Committer: Send + Sync {
    /// Returns the new commit id, or `None` when there was nothing to commit.
    fn commit(&self, request: &CommitRequest) -> Result<Option<String>>;
}

pub struct GitCommitter;

impl Committer for GitCommitter {
    #[instrument(skip_all, fields(push = request.push))]
    fn commit(&self, request: &CommitRequest) -> Result<Option<String>> {
        let git = Git::new(&request.workdir);
        git.add_all()?;
        if !git.commit_staged(&request.message)? {
            return Ok(None);
        }
        let sha = git.head_sha()?;
        if request.push {
            git.push(&request.remote)
                .with_context(|| format!("push {sha} to {}", request.remote))?;
        }
        info!(%sha, "phase committed");
        Ok(Some(sha))
    }
}

/// Commit subject for a completed phase, e.g. `cascade: phase B (B1, B2)`.
pub fn phase_commit_message(phase_id: &str, task_ids: &[&str]) -> String {
    format!("cascade: phase {phase_id} ({})", task_ids.join(", "))
}
