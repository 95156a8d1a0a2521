/// Moving files from the watched root into their category subfolders.
///
/// [`FileOrganizer`] is used both for the bulk sort (startup and scheduled
/// re-sorts) and for single files reported by the watcher. Every file is
/// handled on its own: a failure is written to the audit log and the batch
/// carries on.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditLog, AuditRecord};
use crate::collision;
use crate::config::CompiledFilters;
use crate::file_category::{Classification, RuleSet};
use crate::rule_store::is_internal_file_name;

/// How many times a move is retried when its destination is claimed
/// between probing and linking.
pub const MAX_MOVE_ATTEMPTS: u32 = 8;

/// Errors for a single file move.
#[derive(Debug, Error)]
pub enum MoveError {
    /// Every candidate name was taken by a concurrent writer.
    #[error("no free destination for {} after {attempts} attempts", .destination.display())]
    Conflict { destination: PathBuf, attempts: u32 },
    #[error("permission denied moving {}: {source}", .path.display())]
    PermissionDenied { path: PathBuf, source: io::Error },
    /// The source disappeared mid-operation.
    #[error("{} disappeared before it could be moved", .path.display())]
    Vanished { path: PathBuf },
    #[error("failed to create category folder {}: {source}", .path.display())]
    DirectoryCreation { path: PathBuf, source: io::Error },
    #[error("failed to move {} to {}: {source}", .from.display(), .to.display())]
    Io {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// Errors that stop a whole batch before it starts.
#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("cannot read watched folder {}: {source}", .path.display())]
    InvalidRoot { path: PathBuf, source: io::Error },
}

pub type OrganizeResult<T> = Result<T, OrganizeError>;

/// Relocates top-level files of the watched root into category folders.
#[derive(Debug)]
pub struct FileOrganizer {
    root: PathBuf,
    filters: CompiledFilters,
    audit: Arc<AuditLog>,
}

impl FileOrganizer {
    pub fn new(root: PathBuf, filters: CompiledFilters, audit: Arc<AuditLog>) -> Self {
        Self {
            root,
            filters,
            audit,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Whether a top-level entry with this name is ours to organize.
    pub fn is_candidate(&self, file_name: &str) -> bool {
        !is_internal_file_name(file_name) && self.filters.should_include(file_name)
    }

    /// Top-level regular files eligible for sorting, ordered by name.
    pub fn pending_files(&self) -> OrganizeResult<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.root).map_err(|e| OrganizeError::InvalidRoot {
            path: self.root.clone(),
            source: e,
        })?;

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|entry| self.is_candidate(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Creates the subfolder of every category that does not have one yet.
    pub fn ensure_category_dirs(&self, rules: &RuleSet) {
        for category in rules.categories() {
            let dir = self.root.join(&category.name);
            if let Err(e) = fs::create_dir_all(&dir) {
                warn!("could not create category folder {}: {}", dir.display(), e);
                self.audit.record(&AuditRecord::new(
                    AuditAction::MoveFailed,
                    &dir,
                    format!("cannot create category folder: {}", e),
                ));
            }
        }
    }

    /// Classifies and moves one file, appending the outcome to the audit log.
    ///
    /// Returns `None` when the path is not something this organizer handles:
    /// internal or filtered files, directories, entries below the top level,
    /// and paths that no longer exist.
    pub fn sort_one(&self, path: &Path, rules: &RuleSet) -> Option<AuditRecord> {
        let record = self.organize(path, rules)?;
        self.audit.record(&record);
        Some(record)
    }

    /// Sorts every pending top-level file.
    ///
    /// Files already moved by an earlier pass are simply no longer found, so
    /// running this twice in a row moves nothing the second time.
    ///
    /// A root that cannot be listed is recorded as `SortFailed` before the
    /// error is returned.
    pub fn sort_all(&self, rules: &RuleSet) -> OrganizeResult<Vec<AuditRecord>> {
        let files = match self.pending_files() {
            Ok(files) => files,
            Err(e) => {
                self.audit.record(&AuditRecord::new(
                    AuditAction::SortFailed,
                    &self.root,
                    e.to_string(),
                ));
                return Err(e);
            }
        };
        let records: Vec<AuditRecord> = files
            .iter()
            .filter_map(|path| self.sort_one(path, rules))
            .collect();

        let moved = records
            .iter()
            .filter(|r| r.action == AuditAction::Moved)
            .count();
        info!(
            moved,
            scanned = files.len(),
            "sorted {}",
            self.root.display()
        );
        Ok(records)
    }

    /// Classification of every pending file without touching the filesystem.
    pub fn preview(&self, rules: &RuleSet) -> OrganizeResult<Vec<(PathBuf, Classification)>> {
        Ok(self
            .pending_files()?
            .into_iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let classification = rules.classify(&name);
                (path, classification)
            })
            .collect())
    }

    fn organize(&self, path: &Path, rules: &RuleSet) -> Option<AuditRecord> {
        if path.parent() != Some(self.root.as_path()) {
            debug!("ignoring {} outside the watched top level", path.display());
            return None;
        }

        let file_name = path.file_name()?.to_string_lossy().to_string();
        if !self.is_candidate(&file_name) {
            return None;
        }

        match fs::symlink_metadata(path) {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return None,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                return Some(AuditRecord::new(
                    AuditAction::MoveFailed,
                    path,
                    format!("cannot inspect file: {}", e),
                ));
            }
        }

        let category = match rules.classify(&file_name) {
            Classification::Category(category) => category,
            Classification::Unmatched => {
                return Some(AuditRecord::new(
                    AuditAction::LeftUnmatched,
                    path,
                    "no category for this extension",
                ));
            }
        };

        let record = match self.move_to_category(path, &category) {
            Ok(destination) => {
                let placed = destination
                    .strip_prefix(&self.root)
                    .unwrap_or(&destination)
                    .to_path_buf();
                info!("moved {} -> {}", file_name, placed.display());
                AuditRecord::new(AuditAction::Moved, path, placed.display().to_string())
            }
            Err(e) => {
                warn!("{}", e);
                AuditRecord::new(AuditAction::MoveFailed, path, e.to_string())
            }
        };
        Some(record)
    }

    /// Moves `file_path` into `root/category`, never overwriting anything.
    pub fn move_to_category(&self, file_path: &Path, category: &str) -> Result<PathBuf, MoveError> {
        self.move_with(file_path, category, collision::resolve)
    }

    /// Move loop with the destination resolver passed in.
    fn move_with<R>(&self, file_path: &Path, category: &str, resolve: R) -> Result<PathBuf, MoveError>
    where
        R: Fn(&Path) -> PathBuf,
    {
        let category_path = self.root.join(category);
        fs::create_dir_all(&category_path).map_err(|e| MoveError::DirectoryCreation {
            path: category_path.clone(),
            source: e,
        })?;

        let file_name = file_path.file_name().ok_or_else(|| MoveError::Vanished {
            path: file_path.to_path_buf(),
        })?;
        let wanted = category_path.join(file_name);

        for attempt in 1..=MAX_MOVE_ATTEMPTS {
            let destination = resolve(&wanted);
            match place(file_path, &destination) {
                Ok(()) => return Ok(destination),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(
                        attempt,
                        "{} was claimed concurrently, retrying",
                        destination.display()
                    );
                }
                Err(e) => return Err(move_error(file_path, &destination, e)),
            }
        }

        Err(MoveError::Conflict {
            destination: wanted,
            attempts: MAX_MOVE_ATTEMPTS,
        })
    }
}

/// Moves `source` to `destination`, failing with `AlreadyExists` instead of
/// replacing an existing file.
///
/// Hard-linking is the atomic no-clobber primitive; filesystems that cannot
/// link fall back to a check followed by rename.
fn place(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::hard_link(source, destination) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(source) {
                let _ = fs::remove_file(destination);
                return Err(e);
            }
            Ok(())
        }
        Err(e) if matches!(
            e.kind(),
            io::ErrorKind::AlreadyExists | io::ErrorKind::NotFound
        ) =>
        {
            Err(e)
        }
        Err(_) => {
            if destination.symlink_metadata().is_ok() {
                return Err(io::Error::from(io::ErrorKind::AlreadyExists));
            }
            fs::rename(source, destination)
        }
    }
}

fn move_error(source: &Path, destination: &Path, error: io::Error) -> MoveError {
    match error.kind() {
        io::ErrorKind::NotFound => MoveError::Vanished {
            path: source.to_path_buf(),
        },
        io::ErrorKind::PermissionDenied => MoveError::PermissionDenied {
            path: source.to_path_buf(),
            source: error,
        },
        _ => MoveError::Io {
            from: source.to_path_buf(),
            to: destination.to_path_buf(),
            source: error,
        },
    }
}
