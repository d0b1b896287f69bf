//! File-based status handshake with the agent (`.cascade/status.json`).
//!
//! The controller writes the record to arm a phase (`running`) and to reset it
//! (`idle`); the agent overwrites it with `completed` or `error`. Changes are
//! detected by hashing the raw file bytes, so an unchanged file is never
//! reported twice.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::Utc;
use jsonschema::{Validator, validator_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::core::types::HandshakeState;

const STATUS_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/status_record.schema.json"
));

static STATUS_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(STATUS_SCHEMA).expect("status schema is valid json");
    validator_for(&schema).expect("status schema compiles")
});

/// Shared status record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusRecord {
    pub state: HandshakeState,
    #[serde(default)]
    pub current_phase: Option<String>,
    #[serde(default)]
    pub phases_completed: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// ISO-8601; kept as text so agent-written offsets are not rejected.
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl StatusRecord {
    pub fn idle() -> Self {
        Self {
            state: HandshakeState::Idle,
            current_phase: None,
            phases_completed: Vec::new(),
            files_modified: Vec::new(),
            errors: Vec::new(),
            last_updated: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn running(phase_id: &str, phases_completed: Vec<String>) -> Self {
        Self {
            state: HandshakeState::Running,
            current_phase: Some(phase_id.to_string()),
            phases_completed,
            ..Self::idle()
        }
    }

    /// Completion as the agent would report it.
    pub fn completed(phase_id: &str, files_modified: Vec<String>) -> Self {
        Self {
            state: HandshakeState::Completed,
            current_phase: Some(phase_id.to_string()),
            files_modified,
            ..Self::idle()
        }
    }

    /// Errors joined for display, with a fallback when the agent sent none.
    pub fn error_message(&self) -> String {
        if self.errors.is_empty() {
            "agent reported an error without details".to_string()
        } else {
            self.errors.join("; ")
        }
    }
}

/// Parse and schema-check raw handshake content.
pub fn parse_status(contents: &str) -> Result<StatusRecord, String> {
    let value: Value =
        serde_json::from_str(contents).map_err(|err| format!("invalid json: {err}"))?;
    if !STATUS_VALIDATOR.is_valid(&value) {
        let messages = STATUS_VALIDATOR
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(format!("schema validation failed: {}", messages.join("; ")));
    }
    serde_json::from_value(value).map_err(|err| format!("invalid record: {err}"))
}

/// Read and validate the record, or `None` when the file does not exist.
pub fn read_status(path: &Path) -> Result<Option<StatusRecord>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    parse_status(&contents)
        .map(Some)
        .map_err(|reason| anyhow::anyhow!("{}: {reason}", path.display()))
}

/// Atomically write the record. Returns the exact bytes written.
pub fn write_status(path: &Path, record: &StatusRecord) -> Result<String> {
    let mut buf = serde_json::to_string_pretty(record).context("serialize status record")?;
    buf.push('\n');
    super::write_atomic(path, &buf)?;
    debug!(state = ?record.state, current_phase = ?record.current_phase, "status record written");
    Ok(buf)
}

/// SHA-256 of raw content, hex encoded.
pub fn content_hash(contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    hex::encode(hasher.finalize())
}

/// Result of one watcher poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    /// File missing or byte-identical to the last observation.
    Unchanged,
    Changed(StatusRecord),
    /// New content that failed parsing or schema validation.
    Invalid(String),
}

/// Hash-compare watcher over the handshake file.
#[derive(Debug)]
pub struct HandshakeWatcher {
    path: PathBuf,
    last_hash: Option<String>,
}

impl HandshakeWatcher {
    /// A watcher with no prior observation reports whatever is on disk first.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_hash: None,
        }
    }

    /// Treat `contents` as already observed (used for the controller's own writes).
    pub fn remember(&mut self, contents: &[u8]) {
        self.last_hash = Some(content_hash(contents));
    }

    pub fn poll(&mut self) -> Result<Poll> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Poll::Unchanged),
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", self.path.display()));
            }
        };
        let hash = content_hash(&bytes);
        if self.last_hash.as_deref() == Some(hash.as_str()) {
            return Ok(Poll::Unchanged);
        }
        self.last_hash = Some(hash);

        let contents = String::from_utf8_lossy(&bytes);
        match parse_status(&contents) {
            Ok(record) => {
                debug!(state = ?record.state, current_phase = ?record.current_phase, "status record changed");
                Ok(Poll::Changed(record))
            }
            Err(reason) => {
                warn!(path = %self.path.display(), %reason, "ignoring invalid status record");
                Ok(Poll::Invalid(reason))
            }
        }
    }
}
