//! Command-line interface for tidywatch.
//!
//! Each subcommand opens a [`Daemon`] on the given folder and drives it:
//! `run` keeps it alive until Ctrl+C, the others perform one action and exit.

use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::audit::AuditRecord;
use crate::daemon::{Daemon, DaemonError};
use crate::file_category::{RuleError, normalize_extension};
use crate::output::OutputFormatter;
use crate::watcher::WatcherState;

/// How often `run` checks that the watcher lane is still alive.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(
    name = "tidywatch",
    version,
    about = "Sort a folder into category subfolders by extension and keep it sorted"
)]
pub struct Cli {
    #[arg(help = "Folder to organize and watch")]
    pub folder: PathBuf,
    #[arg(long, global = true, help = "Ignore-filter TOML file")]
    pub filters: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sort the folder, then keep watching it until Ctrl+C
    Run {
        #[arg(long, help = "Do not start the periodic re-sort and cleanup")]
        no_scheduler: bool,
    },
    /// Sort the files currently in the folder once
    Sort {
        #[arg(long, help = "Show where files would go without moving them")]
        dry_run: bool,
    },
    /// Delete expired files from category folders once
    Sweep,
    /// Show or edit the category rules
    Rules {
        #[command(subcommand)]
        command: Option<RulesCommand>,
    },
    /// Show or edit scheduler and retention settings
    Settings {
        #[command(subcommand)]
        command: Option<SettingsCommand>,
    },
    /// Print the end of the audit log
    Log {
        #[arg(short = 'n', long, default_value_t = 20)]
        lines: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum RulesCommand {
    /// Add extensions to a category, creating it if needed
    Add {
        category: String,
        #[arg(required = true)]
        extensions: Vec<String>,
    },
    /// Remove a whole category, or only the listed extensions from it
    Remove {
        category: String,
        extensions: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Set {
        #[arg(long)]
        scheduler_enabled: Option<bool>,
        #[arg(long)]
        scheduler_interval_hours: Option<u64>,
        #[arg(long)]
        auto_delete_enabled: Option<bool>,
        #[arg(long)]
        delete_after_days: Option<u64>,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    #[error(transparent)]
    Rules(#[from] RuleError),
    #[error("no category named '{0}'")]
    UnknownCategory(String),
    #[error("failed to listen for Ctrl+C: {0}")]
    Signal(#[source] io::Error),
    #[error("stopped watching {}; see the audit log", .0.display())]
    WatchLost(PathBuf),
}

/// Runs the parsed command line to completion.
pub async fn run_cli(cli: Cli) -> Result<(), CliError> {
    let daemon = Daemon::open(&cli.folder, cli.filters.as_deref())?;

    match cli.command {
        Command::Run { no_scheduler } => run_daemon(&daemon, no_scheduler).await,
        Command::Sort { dry_run: true } => {
            let plan = daemon.preview()?;
            OutputFormatter::preview(&daemon.root().display().to_string(), &plan);
            Ok(())
        }
        Command::Sort { dry_run: false } => sort_once(&daemon),
        Command::Sweep => {
            let records = daemon.sweep();
            print_records("SWEEP", &records);
            Ok(())
        }
        Command::Rules { command } => edit_rules(&daemon, command),
        Command::Settings { command } => edit_settings(&daemon, command),
        Command::Log { lines } => {
            for line in daemon.tail_log(lines)? {
                OutputFormatter::plain(&line);
            }
            Ok(())
        }
    }
}

async fn run_daemon(daemon: &Daemon, no_scheduler: bool) -> Result<(), CliError> {
    OutputFormatter::info(&format!("Organizing {}", daemon.root().display()));
    let records = daemon.initial_sort()?;
    print_records("INITIAL SORT", &records);

    daemon.start()?;
    if !no_scheduler {
        daemon.start_scheduler()?;
    }
    OutputFormatter::success(&format!(
        "Watching {} (Ctrl+C to stop)",
        daemon.root().display()
    ));

    let outcome = wait_for_interrupt(daemon).await;
    daemon.shutdown();
    if outcome.is_ok() {
        OutputFormatter::success("Stopped");
    }
    outcome
}

async fn wait_for_interrupt(daemon: &Daemon) -> Result<(), CliError> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.map_err(CliError::Signal)?;
                info!("interrupt received");
                return Ok(());
            }
            _ = health.tick() => {
                if daemon.watcher_state() == WatcherState::Lost {
                    return Err(CliError::WatchLost(daemon.root().to_path_buf()));
                }
            }
        }
    }
}

fn sort_once(daemon: &Daemon) -> Result<(), CliError> {
    let organizer = daemon.organizer();
    let snapshot = daemon.snapshot();
    organizer.ensure_category_dirs(&snapshot.rules);

    let pending = organizer
        .pending_files()
        .map_err(|e| CliError::Daemon(e.into()))?;
    let pb = OutputFormatter::create_progress_bar(pending.len() as u64);

    let mut records = Vec::with_capacity(pending.len());
    for path in &pending {
        if let Some(name) = path.file_name() {
            pb.set_message(name.to_string_lossy().to_string());
        }
        if let Some(record) = organizer.sort_one(path, &snapshot.rules) {
            records.push(record);
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    print_records("SORT", &records);
    Ok(())
}

fn edit_rules(daemon: &Daemon, command: Option<RulesCommand>) -> Result<(), CliError> {
    let current = daemon.rules();
    let updated = match command {
        None => {
            OutputFormatter::rules(&current);
            return Ok(());
        }
        Some(RulesCommand::Add {
            category,
            extensions,
        }) => {
            let mut merged: Vec<String> = current
                .category(&category)
                .map(|c| c.extensions.clone())
                .unwrap_or_default();
            for extension in parse_extensions(&category, &extensions)? {
                if !merged.contains(&extension) {
                    merged.push(extension);
                }
            }
            current.with_category(&category, &merged)?
        }
        Some(RulesCommand::Remove {
            category,
            extensions,
        }) if extensions.is_empty() => current
            .without_category(&category)
            .ok_or(CliError::UnknownCategory(category))?,
        Some(RulesCommand::Remove {
            category,
            extensions,
        }) => {
            let existing = current
                .category(&category)
                .ok_or_else(|| CliError::UnknownCategory(category.clone()))?;
            let drop = parse_extensions(&category, &extensions)?;
            let kept: Vec<&String> = existing
                .extensions
                .iter()
                .filter(|e| !drop.contains(e))
                .collect();
            current.with_category(&category, &kept)?
        }
    };

    daemon.save_rules(updated)?;
    OutputFormatter::success("Rules saved");
    OutputFormatter::rules(&daemon.rules());
    Ok(())
}

fn edit_settings(daemon: &Daemon, command: Option<SettingsCommand>) -> Result<(), CliError> {
    let Some(SettingsCommand::Set {
        scheduler_enabled,
        scheduler_interval_hours,
        auto_delete_enabled,
        delete_after_days,
    }) = command
    else {
        OutputFormatter::policy(&daemon.policy());
        return Ok(());
    };

    let mut policy = daemon.policy();
    if let Some(enabled) = scheduler_enabled {
        policy.scheduler_enabled = enabled;
    }
    if let Some(hours) = scheduler_interval_hours {
        policy.scheduler_interval_hours = hours;
    }
    if let Some(enabled) = auto_delete_enabled {
        policy.auto_delete_enabled = enabled;
    }
    if let Some(days) = delete_after_days {
        policy.delete_after_days = days;
    }

    daemon.save_policy(policy)?;
    OutputFormatter::success("Settings saved");
    OutputFormatter::policy(&daemon.policy());
    Ok(())
}

fn print_records(title: &str, records: &[AuditRecord]) {
    for record in records {
        OutputFormatter::record(record);
    }
    OutputFormatter::records_summary(title, records);

    let failures = records.iter().filter(|r| r.action.is_failure()).count();
    if failures > 0 {
        OutputFormatter::warning(&format!(
            "{} file(s) could not be processed; see the audit log",
            failures
        ));
    }
}

/// Normalizes extensions typed on the command line the same way rule files
/// are, rejecting ones that could never match.
fn parse_extensions(category: &str, raw: &[String]) -> Result<Vec<String>, RuleError> {
    raw.iter()
        .map(|extension| {
            normalize_extension(extension).ok_or_else(|| RuleError::InvalidExtension {
                category: category.to_string(),
                extension: extension.clone(),
            })
        })
        .collect()
}
