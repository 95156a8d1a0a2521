//! The core shared by the CLI and any control adapter.
//!
//! A [`Daemon`] owns one watched root: its rule store, the organizer, the
//! watcher lane and, once started, the scheduler lane.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::audit::{AuditLog, AuditRecord};
use crate::config::{ConfigError, FilterConfig};
use crate::file_category::{Classification, RuleSet};
use crate::file_organizer::{FileOrganizer, OrganizeError};
use crate::retention::RetentionSweeper;
use crate::rule_store::{ConfigSnapshot, RetentionPolicy, RuleStore, StoreError};
use crate::scheduler::{DEFAULT_TICK_UNIT, Scheduler, SchedulerHandle};
use crate::watcher::{WatchError, Watcher, WatcherState, WatcherStatus};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("cannot use {} as the watch folder: {source}", .path.display())]
    InvalidRoot { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Filters(#[from] ConfigError),
    #[error(transparent)]
    Organize(#[from] OrganizeError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("failed to start scheduler: {0}")]
    Scheduler(#[source] io::Error),
    #[error("failed to read audit log: {0}")]
    AuditLog(#[source] io::Error),
}

pub type DaemonResult<T> = Result<T, DaemonError>;

pub struct Daemon {
    root: PathBuf,
    store: Arc<RuleStore>,
    organizer: Arc<FileOrganizer>,
    watcher: Watcher,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl Daemon {
    /// Opens `root`, loading (or creating) its rules and settings and the
    /// ignore filters.
    ///
    /// Fails if the folder does not exist or its configuration is corrupt.
    pub fn open(root: &Path, filters: Option<&Path>) -> DaemonResult<Self> {
        let invalid_root = |source| DaemonError::InvalidRoot {
            path: root.to_path_buf(),
            source,
        };
        let root = root.canonicalize().map_err(invalid_root)?;
        if !root.is_dir() {
            return Err(invalid_root(io::Error::other("not a directory")));
        }

        let filters = FilterConfig::load(&root, filters)?.compile()?;
        let store = Arc::new(RuleStore::open(&root)?);
        let audit = Arc::new(AuditLog::in_root(&root));
        let organizer = Arc::new(FileOrganizer::new(root.clone(), filters, audit));
        let watcher = Watcher::new(store.clone(), organizer.clone());

        Ok(Self {
            root,
            store,
            organizer,
            watcher,
            scheduler: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn organizer(&self) -> &FileOrganizer {
        &self.organizer
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.store.snapshot()
    }

    /// Creates the category folders and sorts everything already waiting.
    pub fn initial_sort(&self) -> DaemonResult<Vec<AuditRecord>> {
        let snapshot = self.store.snapshot();
        self.organizer.ensure_category_dirs(&snapshot.rules);
        Ok(self.organizer.sort_all(&snapshot.rules)?)
    }

    pub fn preview(&self) -> DaemonResult<Vec<(PathBuf, Classification)>> {
        Ok(self.organizer.preview(&self.store.snapshot().rules)?)
    }

    /// Runs one retention sweep with the current `delete_after_days`,
    /// regardless of `auto_delete_enabled`.
    pub fn sweep(&self) -> Vec<AuditRecord> {
        let snapshot = self.store.snapshot();
        RetentionSweeper::new(self.root.clone(), self.organizer.audit().clone())
            .sweep(&snapshot.rules, snapshot.policy.delete_after_days)
    }

    pub fn start(&self) -> DaemonResult<WatcherStatus> {
        Ok(self.watcher.start()?)
    }

    pub fn stop(&self) -> WatcherStatus {
        self.watcher.stop()
    }

    pub fn watcher_state(&self) -> WatcherState {
        self.watcher.state()
    }

    /// Starts the scheduler lane. Returns false if it was already running.
    pub fn start_scheduler(&self) -> DaemonResult<bool> {
        self.start_scheduler_with_unit(DEFAULT_TICK_UNIT)
    }

    /// Like [`Daemon::start_scheduler`] with a custom length for one
    /// interval hour.
    pub fn start_scheduler_with_unit(&self, unit: Duration) -> DaemonResult<bool> {
        let mut lane = self.scheduler.lock().unwrap_or_else(PoisonError::into_inner);
        if lane.is_some() {
            return Ok(false);
        }

        let handle = Scheduler::new(self.store.clone(), self.organizer.clone())
            .with_unit(unit)
            .spawn()
            .map_err(DaemonError::Scheduler)?;
        *lane = Some(handle);
        Ok(true)
    }

    /// Stops both lanes. Safe to call more than once.
    pub fn shutdown(&self) {
        self.watcher.stop();
        let scheduler = self.scheduler.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = scheduler {
            handle.shutdown();
        }
        info!("shut down {}", self.root.display());
    }

    /// The last `n` lines of the audit log, oldest first.
    pub fn tail_log(&self, n: usize) -> DaemonResult<Vec<String>> {
        self.organizer.audit().tail(n).map_err(DaemonError::AuditLog)
    }

    pub fn rules(&self) -> RuleSet {
        self.store.snapshot().rules.clone()
    }

    pub fn save_rules(&self, rules: RuleSet) -> DaemonResult<()> {
        self.store.save_rules(rules)?;
        self.organizer.ensure_category_dirs(&self.store.snapshot().rules);
        Ok(())
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.store.snapshot().policy
    }

    pub fn save_policy(&self, policy: RetentionPolicy) -> DaemonResult<()> {
        Ok(self.store.save_policy(policy)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_folder_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let missing = temp_dir.path().join("nope");
        assert!(matches!(
            Daemon::open(&missing, None),
            Err(DaemonError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_open_corrupt_rules_fails() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("settings.json"), "{ not json").unwrap();
        assert!(matches!(
            Daemon::open(temp_dir.path(), None),
            Err(DaemonError::Store(StoreError::ConfigCorrupt { .. }))
        ));
    }

    #[test]
    fn test_initial_sort_creates_category_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = Daemon::open(temp_dir.path(), None).unwrap();
        fs::write(daemon.root().join("a.csv"), "1,2").unwrap();

        let records = daemon.initial_sort().unwrap();

        assert_eq!(records.len(), 1);
        for category in daemon.rules().categories() {
            assert!(daemon.root().join(&category.name).is_dir());
        }
        assert!(daemon.root().join("Data").join("a.csv").exists());
    }

    #[test]
    fn test_save_rules_is_visible_to_next_sort() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = Daemon::open(temp_dir.path(), None).unwrap();
        let rules = daemon.rules().with_category("Text", &["txt"]).unwrap();
        daemon.save_rules(rules).unwrap();

        fs::write(daemon.root().join("notes.TXT"), "hi").unwrap();
        daemon.initial_sort().unwrap();

        assert!(daemon.root().join("Text").join("notes.TXT").exists());
        let reopened = Daemon::open(temp_dir.path(), None).unwrap();
        assert!(reopened.rules().category("Text").is_some());
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = Daemon::open(temp_dir.path(), None).unwrap();
        let mut policy = daemon.policy();
        policy.delete_after_days = 0;

        assert!(matches!(
            daemon.save_policy(policy),
            Err(DaemonError::Store(StoreError::InvalidPolicy(_)))
        ));
        assert_eq!(daemon.policy().delete_after_days, 30);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = Daemon::open(temp_dir.path(), None).unwrap();
        assert_eq!(daemon.start().unwrap(), WatcherStatus::Started);
        assert!(daemon.start_scheduler().unwrap());
        assert!(!daemon.start_scheduler().unwrap());

        daemon.shutdown();
        daemon.shutdown();
        assert_eq!(daemon.watcher_state(), WatcherState::Stopped);
    }
}
