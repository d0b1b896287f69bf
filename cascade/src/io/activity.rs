//! User-facing activity feed (`.cascade/activity.json`), newest first.
//!
//! This is a product artifact read by the control surface, separate from
//! `tracing` diagnostics.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Entries kept on disk.
pub const ACTIVITY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub time: DateTime<Utc>,
    pub level: ActivityLevel,
    pub message: String,
}

/// Bounded activity log persisted after every append.
#[derive(Debug)]
pub struct ActivityLog {
    path: PathBuf,
    entries: Mutex<Vec<ActivityEntry>>,
}

impl ActivityLog {
    /// Open the log, starting empty when the file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match load_entries(&path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "discarding unreadable activity log");
                Vec::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Record an entry. Persistence failures are logged, never propagated.
    pub fn push(&self, level: ActivityLevel, message: impl Into<String>) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(
            0,
            ActivityEntry {
                time: Utc::now(),
                level,
                message: message.into(),
            },
        );
        entries.truncate(ACTIVITY_CAPACITY);
        if let Err(err) = super::write_json_atomic(&self.path, &*entries) {
            warn!(err = %format!("{err:#}"), "failed to persist activity log");
        }
    }

    /// Drop every entry, on disk too.
    pub fn clear(&self) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.clear();
        if let Err(err) = super::write_json_atomic(&self.path, &*entries) {
            warn!(err = %format!("{err:#}"), "failed to persist activity log");
        }
    }

    pub fn entries(&self) -> Vec<ActivityEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn load_entries(path: &Path) -> Result<Vec<ActivityEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut entries: Vec<ActivityEntry> =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    entries.truncate(ACTIVITY_CAPACITY);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_first_and_capped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("activity.json");
        let log = ActivityLog::open(&path);
        for i in 0..(ACTIVITY_CAPACITY + 5) {
            log.push(ActivityLevel::Info, format!("event {i}"));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), ACTIVITY_CAPACITY);
        assert_eq!(entries[0].message, format!("event {}", ACTIVITY_CAPACITY + 4));

        let reopened = ActivityLog::open(&path);
        assert_eq!(reopened.entries(), entries);
    }

    #[test]
    fn clear_empties_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("activity.json");
        let log = ActivityLog::open(&path);
        log.push(ActivityLevel::Info, "old run");

        log.clear();

        assert!(log.entries().is_empty());
        assert!(ActivityLog::open(&path).entries().is_empty());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("activity.json");
        fs::write(&path, "not json").expect("write");
        let log = ActivityLog::open(&path);
        assert!(log.entries().is_empty());
        log.push(ActivityLevel::Error, "recovered");
        assert_eq!(ActivityLog::open(&path).entries().len(), 1);
    }
}
