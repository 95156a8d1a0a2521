//! tidywatch - keep a folder sorted into category subfolders
//!
//! Files arriving in the watched folder are classified by extension and moved
//! into a subfolder named after their category. A scheduler re-sorts the
//! folder periodically and can delete files that have sat in a category
//! folder for too long. Every outcome is appended to an audit log kept in the
//! watched folder.

pub mod audit;
pub mod cli;
pub mod collision;
pub mod config;
pub mod daemon;
pub mod file_category;
pub mod file_organizer;
pub mod output;
pub mod retention;
pub mod rule_store;
pub mod scheduler;
pub mod watcher;

pub use audit::{AuditAction, AuditLog, AuditRecord};
pub use config::{CompiledFilters, ConfigError, FilterConfig};
pub use daemon::{Daemon, DaemonError};
pub use file_category::{Category, Classification, RuleError, RuleSet};
pub use file_organizer::{FileOrganizer, MoveError, OrganizeError};
pub use retention::RetentionSweeper;
pub use rule_store::{ConfigSnapshot, RetentionPolicy, RuleStore, StoreError};
pub use scheduler::{Scheduler, SchedulerHandle, TickOutcome};
pub use watcher::{FileEvent, FileEventKind, WatchError, Watcher, WatcherState, WatcherStatus};

pub use cli::{Cli, run_cli};
