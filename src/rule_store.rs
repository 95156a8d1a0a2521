//! Persistence and live snapshots of the rules and settings documents.
//!
//! Both documents live inside the watched root as human-editable JSON. The
//! store is the only writer: every save validates, writes through a temp file
//! and rename, and then installs a fresh [`ConfigSnapshot`]. Readers call
//! [`RuleStore::snapshot`] once per operation and keep working on that `Arc`
//! even if a newer snapshot is installed meanwhile.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::LOG_FILE;
use crate::config::ROOT_FILTER_FILE;
use crate::file_category::RuleSet;

/// Rules document (category -> extensions).
pub const RULES_FILE: &str = "settings.json";
/// Scheduler and retention settings document.
pub const SETTINGS_FILE: &str = "user_settings.json";

/// Errors raised while loading or saving configuration documents.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The persisted document exists but cannot be parsed or fails validation.
    #[error("configuration file {} is corrupt: {reason}", .path.display())]
    ConfigCorrupt { path: PathBuf, reason: String },
    /// The document could not be written.
    #[error("failed to write configuration file {}: {source}", .path.display())]
    ConfigWrite { path: PathBuf, source: io::Error },
    /// The document exists but could not be read.
    #[error("failed to read configuration file {}: {source}", .path.display())]
    ConfigRead { path: PathBuf, source: io::Error },
    /// A policy handed to `save_policy` violates its invariants.
    #[error("invalid retention policy: {0}")]
    InvalidPolicy(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Scheduler and retention settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub scheduler_enabled: bool,
    pub scheduler_interval_hours: u64,
    pub auto_delete_enabled: bool,
    pub delete_after_days: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            scheduler_enabled: true,
            scheduler_interval_hours: 6,
            auto_delete_enabled: true,
            delete_after_days: 30,
        }
    }
}

impl RetentionPolicy {
    /// Checks `scheduler_interval_hours >= 1` and `delete_after_days >= 1`.
    pub fn validate(&self) -> Result<(), String> {
        if self.scheduler_interval_hours == 0 {
            return Err("scheduler_interval_hours must be at least 1".to_string());
        }
        if self.delete_after_days == 0 {
            return Err("delete_after_days must be at least 1".to_string());
        }
        Ok(())
    }

    /// Scheduler period expressed in `unit`s (one hour in production).
    pub fn interval(&self, unit: Duration) -> Duration {
        unit.saturating_mul(u32::try_from(self.scheduler_interval_hours).unwrap_or(u32::MAX))
    }
}

/// Immutable configuration state read at the start of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub rules: RuleSet,
    pub policy: RetentionPolicy,
}

/// Owner of the persisted rules/settings and of the current snapshot.
#[derive(Debug)]
pub struct RuleStore {
    rules_path: PathBuf,
    settings_path: PathBuf,
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl RuleStore {
    /// Loads both documents from `root`, writing defaults for missing ones.
    pub fn open(root: &Path) -> StoreResult<Self> {
        let rules_path = root.join(RULES_FILE);
        let settings_path = root.join(SETTINGS_FILE);

        let rules = load_or_create(&rules_path, RuleSet::default)?;
        let policy: RetentionPolicy = load_or_create(&settings_path, RetentionPolicy::default)?;
        policy
            .validate()
            .map_err(|reason| StoreError::ConfigCorrupt {
                path: settings_path.clone(),
                reason,
            })?;

        info!(
            categories = rules.categories().len(),
            "loaded rules from {}",
            rules_path.display()
        );

        Ok(Self {
            rules_path,
            settings_path,
            current: RwLock::new(Arc::new(ConfigSnapshot { rules, policy })),
        })
    }

    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// The configuration in effect right now.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reads the rules document from disk without touching the snapshot.
    pub fn load_rules(&self) -> StoreResult<RuleSet> {
        load_or_create(&self.rules_path, RuleSet::default)
    }

    /// Reads the settings document from disk without touching the snapshot.
    pub fn load_policy(&self) -> StoreResult<RetentionPolicy> {
        let policy: RetentionPolicy = load_or_create(&self.settings_path, RetentionPolicy::default)?;
        policy
            .validate()
            .map_err(|reason| StoreError::ConfigCorrupt {
                path: self.settings_path.clone(),
                reason,
            })?;
        Ok(policy)
    }

    /// Persists `rules` and makes them the live rule set.
    pub fn save_rules(&self, rules: RuleSet) -> StoreResult<()> {
        write_json(&self.rules_path, &rules)?;
        self.install(|snapshot| snapshot.rules = rules);
        Ok(())
    }

    /// Persists `policy` and makes it the live policy.
    pub fn save_policy(&self, policy: RetentionPolicy) -> StoreResult<()> {
        policy.validate().map_err(StoreError::InvalidPolicy)?;
        write_json(&self.settings_path, &policy)?;
        self.install(|snapshot| snapshot.policy = policy);
        Ok(())
    }

    /// Re-reads the rules document after an out-of-band edit.
    ///
    /// Returns whether the rules changed. On failure the current snapshot
    /// stays in effect.
    pub fn reload_rules(&self) -> StoreResult<bool> {
        let rules = self.load_rules()?;
        if self.snapshot().rules == rules {
            return Ok(false);
        }
        info!("rules reloaded from {}", self.rules_path.display());
        self.install(|snapshot| snapshot.rules = rules);
        Ok(true)
    }

    /// Re-reads the settings document after an out-of-band edit.
    pub fn reload_policy(&self) -> StoreResult<()> {
        let policy = self.load_policy()?;
        if self.snapshot().policy != policy {
            info!("settings reloaded from {}", self.settings_path.display());
            self.install(|snapshot| snapshot.policy = policy);
        }
        Ok(())
    }

    /// Copies the current snapshot, applies `edit`, and swaps the result in.
    fn install(&self, edit: impl FnOnce(&mut ConfigSnapshot)) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = ConfigSnapshot::clone(&guard);
        edit(&mut next);
        *guard = Arc::new(next);
    }
}

/// True for the documents and temp files this crate keeps in the watched root.
pub fn is_internal_file_name(name: &str) -> bool {
    [RULES_FILE, SETTINGS_FILE, LOG_FILE, ROOT_FILTER_FILE]
        .iter()
        .any(|internal| name == *internal || name == temp_name(internal))
}

fn temp_name(file_name: &str) -> String {
    format!(".{}.tmp", file_name)
}

fn load_or_create<T, F>(path: &Path, default: F) -> StoreResult<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
    F: FnOnce() -> T,
{
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let value = default();
            warn!("{} not found, writing defaults", path.display());
            write_json(path, &value)?;
            return Ok(value);
        }
        Err(e) => {
            return Err(StoreError::ConfigRead {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    serde_json::from_str(&content).map_err(|e| StoreError::ConfigCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| StoreError::ConfigWrite {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    })?;

    write_atomic(path, json.as_bytes()).map_err(|e| StoreError::ConfigWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Writes `data` next to `path` and renames it into place.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "config".to_string());
    let temp_path = parent.join(temp_name(&file_name));

    let written = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(data)?;
        file.write_all(b"\n")?;
        file.sync_all()
    })();

    if let Err(e) = written.and_then(|()| fs::rename(&temp_path, path)) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(())
}
