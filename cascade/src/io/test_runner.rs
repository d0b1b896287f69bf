//! Test command adapter run after the agent reports a phase complete.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument};

use super::config::TestsConfig;
use super::process::{ProcessSpec, run_bounded};
use crate::core::types::TestOutcome;
use crate::session::TestResult;

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub phase_id: String,
    pub workdir: PathBuf,
    pub command: Vec<String>,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl TestRequest {
    pub fn from_config(
        config: &TestsConfig,
        phase_id: &str,
        workdir: PathBuf,
        log_path: PathBuf,
    ) -> Self {
        Self {
            phase_id: phase_id.to_string(),
            workdir,
            command: config.command.clone(),
            log_path,
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

pub trait TestRunner: Send + Sync {
    fn run(&self, request: &TestRequest) -> Result<TestResult>;
}

/// Runs the configured shell command and writes its output to `log_path`.
pub struct CommandTestRunner;

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(phase_id = %request.phase_id))]
    fn run(&self, request: &TestRequest) -> Result<TestResult> {
        let output = run_bounded(&ProcessSpec {
            argv: request.command.clone(),
            workdir: request.workdir.clone(),
            timeout: request.timeout,
            output_limit_bytes: request.output_limit_bytes,
        })?;

        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create test log dir {}", parent.display()))?;
        }
        fs::write(&request.log_path, output.log_text())
            .with_context(|| format!("write test log {}", request.log_path.display()))?;

        let (outcome, summary) = if output.timed_out() {
            (
                TestOutcome::Fail,
                format!("timed out after {}s", request.timeout.as_secs()),
            )
        } else if output.success() {
            (TestOutcome::Pass, "passed".to_string())
        } else {
            let code = output
                .status
                .and_then(|status| status.code())
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            (TestOutcome::Fail, format!("failed (exit {code})"))
        };
        info!(outcome = ?outcome, %summary, "tests finished");

        Ok(TestResult {
            outcome,
            summary: format!("{summary}; log: {}", request.log_path.display()),
            finished_at: Utc::now(),
        })
    }
}

/// Result recorded when tests are disabled.
pub fn skipped_result() -> TestResult {
    TestResult {
        outcome: TestOutcome::Skipped,
        summary: "tests disabled".to_string(),
        finished_at: Utc::now(),
    }
}
