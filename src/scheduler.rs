//! Periodic re-sort and retention sweep.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::audit::AuditRecord;
use crate::file_organizer::FileOrganizer;
use crate::retention::RetentionSweeper;
use crate::rule_store::{RetentionPolicy, RuleStore};

/// Length of one `scheduler_interval_hours` step.
pub const DEFAULT_TICK_UNIT: Duration = Duration::from_secs(60 * 60);

/// What a single scheduler tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// Scheduling is disabled in the current policy.
    Skipped,
    Ran {
        sorted: Vec<AuditRecord>,
        swept: Vec<AuditRecord>,
    },
}

pub struct Scheduler {
    store: Arc<RuleStore>,
    organizer: Arc<FileOrganizer>,
    sweeper: RetentionSweeper,
    unit: Duration,
    last_enabled: Option<bool>,
}

impl Scheduler {
    pub fn new(store: Arc<RuleStore>, organizer: Arc<FileOrganizer>) -> Self {
        let sweeper = RetentionSweeper::new(organizer.root().to_path_buf(), organizer.audit().clone());
        Self {
            store,
            organizer,
            sweeper,
            unit: DEFAULT_TICK_UNIT,
            last_enabled: None,
        }
    }

    /// Replaces the hour with another unit. Tests use milliseconds.
    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    /// Runs one re-sort, followed by a sweep when auto-delete is on.
    ///
    /// The policy is read once at the start of the tick; edits made while it
    /// runs apply to the next one.
    pub fn tick(&mut self) -> TickOutcome {
        let snapshot = self.store.snapshot();
        let policy = snapshot.policy;

        self.announce(&policy);

        if !policy.scheduler_enabled {
            return TickOutcome::Skipped;
        }

        let sorted = match self.organizer.sort_all(&snapshot.rules) {
            Ok(records) => records,
            Err(e) => {
                error!("scheduled re-sort failed: {}", e);
                Vec::new()
            }
        };

        let swept = if policy.auto_delete_enabled {
            self.sweeper.sweep(&snapshot.rules, policy.delete_after_days)
        } else {
            Vec::new()
        };

        debug!(sorted = sorted.len(), swept = swept.len(), "scheduler tick done");
        TickOutcome::Ran { sorted, swept }
    }

    /// Logs whether scheduling is on, once per change. Returns whether it
    /// logged.
    fn announce(&mut self, policy: &RetentionPolicy) -> bool {
        if self.last_enabled == Some(policy.scheduler_enabled) {
            return false;
        }
        if policy.scheduler_enabled {
            info!(
                "scheduled re-sort enabled every {}h",
                policy.scheduler_interval_hours
            );
        } else {
            info!("scheduled re-sort disabled");
        }
        self.last_enabled = Some(policy.scheduler_enabled);
        true
    }

    /// Moves the scheduler onto its own thread.
    pub fn spawn(self) -> io::Result<SchedulerHandle> {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("tidywatch-scheduler".to_string())
            .spawn(move || self.run(rx))?;
        Ok(SchedulerHandle {
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    fn run(mut self, shutdown: mpsc::Receiver<()>) {
        let policy = self.store.snapshot().policy;
        self.announce(&policy);
        loop {
            // Re-read every cycle so interval edits apply to the next wait.
            let interval = self.store.snapshot().policy.interval(self.unit);
            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    self.tick();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("scheduler stopped");
    }
}

/// Owner of a running scheduler thread. Dropping it stops the thread.
pub struct SchedulerHandle {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stops the scheduler, waiting for an in-flight tick to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
