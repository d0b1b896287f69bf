//! Session snapshot storage (`.cascade/session.json`) and reset archives.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::session::Session;

/// Load a session snapshot, or `None` when no snapshot exists yet.
pub fn load_session(path: &Path) -> Result<Option<Session>> {
    if !path.exists() {
        debug!(path = %path.display(), "no session snapshot");
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read session {}", path.display()))?;
    let session: Session = serde_json::from_str(&contents)
        .with_context(|| format!("parse session {}", path.display()))?;
    debug!(session_id = %session.id, state = %session.state, "session loaded");
    Ok(Some(session))
}

/// Atomically write the full session snapshot (temp file + rename).
pub fn write_session(path: &Path, session: &Session) -> Result<()> {
    debug!(
        path = %path.display(),
        session_id = %session.id,
        state = %session.state,
        "writing session"
    );
    super::write_json_atomic(path, session)
}

/// Copy a session snapshot into `history_dir` as `<session id>.json`.
///
/// Returns the archive path.
pub fn archive_session(history_dir: &Path, session: &Session) -> Result<PathBuf> {
    let path = history_dir.join(format!("{}.json", session.id));
    super::write_json_atomic(&path, session)
        .with_context(|| format!("archive session {}", session.id))?;
    debug!(archive = %path.display(), "session archived");
    Ok(path)
}
