//! Append-only audit log kept in the watched root.
//!
//! Each [`AuditRecord`] becomes one line:
//!
//! ```text
//! [2025-03-01 14:02:11] MOVED /watch/report.pdf :: PDFs/report.pdf
//! ```

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::error;

/// Audit log file name inside the watched root.
pub const LOG_FILE: &str = "file_organizer_log.txt";

/// What happened to the subject of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditAction {
    Moved,
    LeftUnmatched,
    MoveFailed,
    Deleted,
    DeleteFailed,
    /// A bulk sort could not list the watched root.
    SortFailed,
    /// A hand edit of the rules or settings was invalid and ignored.
    ConfigRejected,
    WatchLost,
}

impl AuditAction {
    pub fn label(&self) -> &'static str {
        match self {
            AuditAction::Moved => "MOVED",
            AuditAction::LeftUnmatched => "UNMATCHED",
            AuditAction::MoveFailed => "MOVE_FAILED",
            AuditAction::Deleted => "DELETED",
            AuditAction::DeleteFailed => "DELETE_FAILED",
            AuditAction::SortFailed => "SORT_FAILED",
            AuditAction::ConfigRejected => "CONFIG_REJECTED",
            AuditAction::WatchLost => "WATCH_LOST",
        }
    }

    /// Failure actions, reported on stderr by the CLI.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AuditAction::MoveFailed
                | AuditAction::DeleteFailed
                | AuditAction::SortFailed
                | AuditAction::ConfigRejected
                | AuditAction::WatchLost
        )
    }
}

/// One classification, move, deletion, or failure outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Local>,
    pub action: AuditAction,
    pub subject: PathBuf,
    pub detail: String,
}

impl AuditRecord {
    pub fn new(action: AuditAction, subject: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            action,
            subject: subject.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} :: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.action.label(),
            self.subject.display(),
            self.detail
        )
    }
}

/// Line-oriented append-only log file.
///
/// Appends are serialised through an internal mutex so the watcher and
/// scheduler lanes never interleave partial lines.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    /// Audit log living at `root/LOG_FILE`.
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(LOG_FILE))
    }

    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record.
    pub fn append(&self, record: &AuditRecord) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", record)
    }

    /// Appends a record, reporting rather than returning a write failure.
    ///
    /// A broken log must not stop files from being organized.
    pub fn record(&self, record: &AuditRecord) {
        if let Err(e) = self.append(record) {
            error!("failed to append to audit log {}: {}", self.path.display(), e);
        }
    }

    /// The last `n` lines of the log, oldest first. A missing log is empty.
    pub fn tail(&self, n: usize) -> io::Result<Vec<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].iter().map(|l| l.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_line_format() {
        let record = AuditRecord::new(AuditAction::Moved, "/w/report.pdf", "PDFs/report.pdf");
        let line = record.to_string();
        assert!(line.starts_with('['));
        assert!(line.ends_with("] MOVED /w/report.pdf :: PDFs/report.pdf"));
    }

    #[test]
    fn test_append_and_tail() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let log = AuditLog::in_root(temp_dir.path());

        for i in 0..5 {
            log.append(&AuditRecord::new(
                AuditAction::Deleted,
                format!("f{}.txt", i),
                "expired",
            ))
            .unwrap();
        }

        let tail = log.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert!(tail[0].contains("f3.txt"));
        assert!(tail[1].contains("f4.txt"));
        assert_eq!(log.tail(100).unwrap().len(), 5);
    }

    #[test]
    fn test_tail_missing_log_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let log = AuditLog::in_root(temp_dir.path());
        assert!(log.tail(10).unwrap().is_empty());
    }

    #[test]
    fn test_failure_actions() {
        assert!(AuditAction::MoveFailed.is_failure());
        assert!(AuditAction::DeleteFailed.is_failure());
        assert!(AuditAction::ConfigRejected.is_failure());
        assert!(AuditAction::SortFailed.is_failure());
        assert!(!AuditAction::Moved.is_failure());
        assert!(!AuditAction::LeftUnmatched.is_failure());
    }
}
