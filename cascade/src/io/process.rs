//! Child processes with a wall-clock timeout and bounded captured output.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Program invocation for [`run_bounded`].
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and counted.
    pub output_limit_bytes: usize,
}

/// Captured result of a finished (or killed) child.
#[derive(Debug)]
pub struct ProcessOutput {
    /// `None` when the child was killed on timeout.
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub dropped_bytes: usize,
}

impl ProcessOutput {
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }

    pub fn success(&self) -> bool {
        self.status.is_some_and(|status| status.success())
    }

    /// Both streams in one log body, with truncation and timeout notes.
    pub fn log_text(&self) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.dropped_bytes > 0 {
            buf.push_str(&format!("\n[truncated {} bytes]\n", self.dropped_bytes));
        }
        if self.timed_out() {
            buf.push_str("\n[timed out]\n");
        }
        buf
    }
}

/// Run `spec.argv` in `spec.workdir`, draining both pipes on reader threads so
/// a chatty child cannot deadlock on a full pipe.
#[instrument(skip_all, fields(program = spec.argv.first().map(String::as_str), timeout_secs = spec.timeout.as_secs()))]
pub fn run_bounded(spec: &ProcessSpec) -> Result<ProcessOutput> {
    let Some((program, args)) = spec.argv.split_first() else {
        bail!("empty command");
    };
    let mut child = Command::new(program)
        .args(args)
        .current_dir(&spec.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn {}", spec.argv.join(" ")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = spec.output_limit_bytes;
    let stdout_reader = thread::spawn(move || read_limited(stdout, limit));
    let stderr_reader = thread::spawn(move || read_limited(stderr, limit));

    let status = match child.wait_timeout(spec.timeout).context("wait for child")? {
        Some(status) => Some(status),
        None => {
            warn!("child timed out, killing");
            child.kill().context("kill child")?;
            child.wait().context("reap child after kill")?;
            None
        }
    };

    let (stdout, stdout_dropped) = join_reader(stdout_reader).context("join stdout")?;
    let (stderr, stderr_dropped) = join_reader(stderr_reader).context("join stderr")?;
    debug!(exit_code = ?status.and_then(|s| s.code()), "child finished");

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        dropped_bytes: stdout_dropped + stderr_dropped,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
    Ok((kept, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration, limit: usize) -> ProcessSpec {
        ProcessSpec {
            argv: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            workdir: std::env::temp_dir(),
            timeout,
            output_limit_bytes: limit,
        }
    }

    #[test]
    fn reader_keeps_prefix_and_counts_rest() {
        let (kept, dropped) = read_limited(&b"abcdefgh"[..], 3).expect("read");
        assert_eq!(kept, b"abc");
        assert_eq!(dropped, 5);
    }

    #[cfg(unix)]
    #[test]
    fn captures_exit_status_and_streams() {
        let out = run_bounded(&sh("echo out; echo err >&2; exit 3", Duration::from_secs(10), 1_000))
            .expect("run");
        assert!(!out.success());
        assert_eq!(out.status.and_then(|s| s.code()), Some(3));
        let log = out.log_text();
        assert!(log.contains("out"));
        assert!(log.contains("err"));
    }

    #[cfg(unix)]
    #[test]
    fn kills_child_on_timeout() {
        let out = run_bounded(&sh("exec sleep 5", Duration::from_millis(100), 1_000)).expect("run");
        assert!(out.timed_out());
        assert!(out.log_text().contains("[timed out]"));
    }

    #[test]
    fn empty_argv_is_an_error() {
        let spec = ProcessSpec {
            argv: Vec::new(),
            workdir: std::env::temp_dir(),
            timeout: Duration::from_secs(1),
            output_limit_bytes: 10,
        };
        assert!(run_bounded(&spec).is_err());
    }
}
