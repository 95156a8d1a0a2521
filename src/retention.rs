//! Age-based cleanup of category subfolders.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::audit::{AuditAction, AuditLog, AuditRecord};
use crate::file_category::RuleSet;

const SECONDS_PER_DAY: u64 = 86_400;

/// Deletes expired files from category folders.
///
/// Only regular files directly inside a folder named after a category in the
/// current rule set are considered. Top-level files and other subfolders are
/// never touched.
#[derive(Debug)]
pub struct RetentionSweeper {
    root: PathBuf,
    audit: Arc<AuditLog>,
}

impl RetentionSweeper {
    pub fn new(root: PathBuf, audit: Arc<AuditLog>) -> Self {
        Self { root, audit }
    }

    /// Deletes every file last modified more than `delete_after_days` ago.
    ///
    /// A file that cannot be deleted yields a `DeleteFailed` record and the
    /// sweep continues.
    pub fn sweep(&self, rules: &RuleSet, delete_after_days: u64) -> Vec<AuditRecord> {
        self.sweep_with(rules, delete_after_days, |path| fs::remove_file(path))
    }

    fn sweep_with<D>(&self, rules: &RuleSet, delete_after_days: u64, delete: D) -> Vec<AuditRecord>
    where
        D: Fn(&Path) -> io::Result<()>,
    {
        let max_age = Duration::from_secs(delete_after_days.saturating_mul(SECONDS_PER_DAY));
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut records = Vec::new();
        for category in rules.categories() {
            let dir = self.root.join(&category.name);
            self.sweep_dir(&dir, cutoff, &delete, &mut records);
        }

        let deleted = records
            .iter()
            .filter(|r| r.action == AuditAction::Deleted)
            .count();
        info!(deleted, failed = records.len() - deleted, "retention sweep finished");
        records
    }

    fn sweep_dir<D>(&self, dir: &Path, cutoff: SystemTime, delete: &D, records: &mut Vec<AuditRecord>)
    where
        D: Fn(&Path) -> io::Result<()>,
    {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("cannot read category folder {}: {}", dir.display(), e);
                self.push(
                    records,
                    AuditRecord::new(
                        AuditAction::DeleteFailed,
                        dir,
                        format!("cannot read folder: {}", e),
                    ),
                );
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let modified = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata.modified(),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => Err(e),
            };

            match modified {
                Ok(modified) if modified < cutoff => {}
                Ok(_) => continue,
                Err(e) => {
                    self.push(
                        records,
                        AuditRecord::new(
                            AuditAction::DeleteFailed,
                            &path,
                            format!("cannot read modification time: {}", e),
                        ),
                    );
                    continue;
                }
            }

            let record = match delete(&path) {
                Ok(()) => AuditRecord::new(AuditAction::Deleted, &path, "expired"),
                Err(e) => {
                    warn!("failed to delete {}: {}", path.display(), e);
                    AuditRecord::new(AuditAction::DeleteFailed, &path, e.to_string())
                }
            };
            self.push(records, record);
        }
    }

    fn push(&self, records: &mut Vec<AuditRecord>, record: AuditRecord) {
        self.audit.record(&record);
        records.push(record);
    }
}
