//! Cascade configuration stored under `.cascade/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::split::SplitLimits;

/// Context window of the target agent, in tokens.
const AGENT_CONTEXT_TOKENS: usize = 128_000;

/// Cascade configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults, so an
/// empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CascadeConfig {
    /// Plan file, relative to the project root.
    pub plan_file: PathBuf,

    pub max_tasks_per_phase: usize,

    /// Defaults to 70% of the agent's context window.
    pub max_tokens_per_phase: usize,

    /// Retries allowed per phase, automatic and manual combined.
    pub max_retries: u32,

    /// Start the next pending phase as soon as one completes.
    pub auto_cascade: bool,

    /// Handshake poll interval for the monitor thread.
    pub poll_interval_ms: u64,

    /// Pause between a completed phase and arming the next one.
    pub cascade_delay_ms: u64,

    /// Pause before an automatic retry of a failed phase.
    pub retry_delay_ms: u64,

    pub tests: TestsConfig,
    pub commit: CommitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    pub enabled: bool,
    /// Program and arguments (e.g. `["cargo", "test"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate test stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommitConfig {
    pub enabled: bool,
    pub push: bool,
    pub remote: String,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            plan_file: PathBuf::from(".cascade/planning.md"),
            max_tasks_per_phase: 8,
            max_tokens_per_phase: AGENT_CONTEXT_TOKENS * 7 / 10,
            max_retries: 3,
            auto_cascade: true,
            poll_interval_ms: 2_000,
            cascade_delay_ms: 1_000,
            retry_delay_ms: 5_000,
            tests: TestsConfig::default(),
            commit: CommitConfig::default(),
        }
    }
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: vec!["cargo".to_string(), "test".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            push: false,
            remote: "origin".to_string(),
        }
    }
}

impl CascadeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.plan_file.as_os_str().is_empty() {
            return Err(anyhow!("plan_file must not be empty"));
        }
        if self.max_tasks_per_phase == 0 {
            return Err(anyhow!("max_tasks_per_phase must be > 0"));
        }
        if self.max_tokens_per_phase == 0 {
            return Err(anyhow!("max_tokens_per_phase must be > 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if self.tests.enabled {
            if self.tests.command.is_empty() || self.tests.command[0].trim().is_empty() {
                return Err(anyhow!("tests.command must be a non-empty array"));
            }
            if self.tests.timeout_secs == 0 {
                return Err(anyhow!("tests.timeout_secs must be > 0"));
            }
        }
        if self.tests.output_limit_bytes == 0 {
            return Err(anyhow!("tests.output_limit_bytes must be > 0"));
        }
        if self.commit.push && self.commit.remote.trim().is_empty() {
            return Err(anyhow!("commit.remote must be set when commit.push is enabled"));
        }
        Ok(())
    }

    pub fn split_limits(&self) -> SplitLimits {
        SplitLimits {
            max_tasks: self.max_tasks_per_phase,
            max_tokens: self.max_tokens_per_phase,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cascade_delay(&self) -> Duration {
        Duration::from_millis(self.cascade_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CascadeConfig::default()`.
pub fn load_config(path: &Path) -> Result<CascadeConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        return Ok(CascadeConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CascadeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CascadeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, CascadeConfig::default());
        assert_eq!(cfg.max_tokens_per_phase, 89_600);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = CascadeConfig::default();
        cfg.tests.enabled = true;
        cfg.commit.enabled = true;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_retries = 1\n\n[tests]\nenabled = true\n").expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_retries, 1);
        assert!(cfg.tests.enabled);
        assert_eq!(cfg.tests.command, vec!["cargo", "test"]);
        assert_eq!(cfg.max_tasks_per_phase, 8);
    }

    #[test]
    fn rejects_zero_limits() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_tasks_per_phase = 0\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_tasks_per_phase must be > 0"));
    }

    #[test]
    fn enabled_tests_need_a_command() {
        let mut cfg = CascadeConfig::default();
        cfg.tests.enabled = true;
        cfg.tests.command = Vec::new();
        assert!(cfg.validate().is_err());
    }
}
