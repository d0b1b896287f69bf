//! Side-effecting adapters: filesystem state, subprocesses, and templates.

pub mod activity;
pub mod command;
pub mod config;
pub mod context;
pub mod git;
pub mod handshake;
pub mod init;
pub mod process;
pub mod session_store;
pub mod test_runner;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Write `contents` next to `path` and rename it into place.
///
/// Readers never observe a partially written file.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Pretty JSON with a trailing newline, written atomically.
pub(crate) fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, &buf)
}
