//! Filesystem watcher lane.
//!
//! Notifications for the watched root are turned into [`FileEvent`]s and fed,
//! one at a time, through a single dispatch function on a dedicated thread.
//! The notify subscription itself knows nothing about sorting.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditAction, AuditRecord};
use crate::file_organizer::FileOrganizer;
use crate::rule_store::RuleStore;

/// A second subscription loss within this window after a successful
/// resubscription ends the lane.
const RESUBSCRIBE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {}: {source}", .path.display())]
    Subscribe {
        path: PathBuf,
        source: notify::Error,
    },
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// A file appeared: created, or renamed into the watched root.
    Created,
    /// An existing file's content or metadata changed.
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Translates a raw notification. Removals and rename sources yield
    /// nothing.
    pub fn from_notify(event: &Event) -> Vec<FileEvent> {
        let created = |paths: &[PathBuf]| -> Vec<FileEvent> {
            paths
                .iter()
                .map(|p| FileEvent::new(p.clone(), FileEventKind::Created))
                .collect()
        };

        match event.kind {
            EventKind::Create(_) => created(event.paths.as_slice()),
            // For a paired rename the destination is the last path.
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                created(event.paths.last().map(std::slice::from_ref).unwrap_or_default())
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
            EventKind::Modify(ModifyKind::Name(_)) => created(event.paths.as_slice()),
            EventKind::Modify(_) => event
                .paths
                .iter()
                .map(|p| FileEvent::new(p.clone(), FileEventKind::Modified))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Lifecycle change reported by [`Watcher::start`] and [`Watcher::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatus {
    Started,
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
}

/// Observable state of the watcher lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Running,
    Stopped,
    /// The subscription died and could not be re-established.
    Lost,
}

enum Signal {
    Fs(notify::Result<Event>),
    Stop,
}

struct Lane {
    tx: Sender<Signal>,
    handle: JoinHandle<()>,
    lost: Arc<AtomicBool>,
}

/// Everything the dispatch function needs, shared with the lane thread.
struct Core {
    root: PathBuf,
    store: Arc<RuleStore>,
    organizer: Arc<FileOrganizer>,
}

/// Watches the top level of one folder and sorts files as they arrive.
pub struct Watcher {
    core: Arc<Core>,
    lane: Mutex<Option<Lane>>,
}

impl Watcher {
    pub fn new(store: Arc<RuleStore>, organizer: Arc<FileOrganizer>) -> Self {
        let root = organizer.root().to_path_buf();
        Self {
            core: Arc::new(Core {
                root,
                store,
                organizer,
            }),
            lane: Mutex::new(None),
        }
    }

    /// Subscribes to notifications and starts the dispatch thread.
    ///
    /// Starting a running watcher does nothing. A lane that was lost is
    /// reaped and replaced.
    pub fn start(&self) -> Result<WatcherStatus, WatchError> {
        let mut lane = self.lane.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = lane.as_ref() {
            if !existing.lost.load(Ordering::SeqCst) {
                return Ok(WatcherStatus::AlreadyRunning);
            }
            if let Some(dead) = lane.take() {
                let _ = dead.handle.join();
            }
        }

        let (tx, rx) = mpsc::channel();
        let subscription = subscribe(&self.core.root, tx.clone())?;
        let lost = Arc::new(AtomicBool::new(false));

        let dispatcher = Dispatcher {
            core: self.core.clone(),
            tx: tx.clone(),
            lost: lost.clone(),
            recovered_at: None,
        };
        let handle = thread::Builder::new()
            .name("tidywatch-watcher".to_string())
            .spawn(move || dispatcher.run(subscription, rx))
            .map_err(WatchError::Spawn)?;

        info!("watching {}", self.core.root.display());
        *lane = Some(Lane { tx, handle, lost });
        Ok(WatcherStatus::Started)
    }

    /// Unsubscribes and waits for already-queued notifications to be handled.
    pub fn stop(&self) -> WatcherStatus {
        let Some(lane) = self.lane.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return WatcherStatus::AlreadyStopped;
        };

        // Fails only if the lane already exited after losing its subscription.
        let _ = lane.tx.send(Signal::Stop);
        if lane.handle.join().is_err() {
            error!("watcher thread panicked");
        }
        info!("stopped watching {}", self.core.root.display());
        WatcherStatus::Stopped
    }

    pub fn state(&self) -> WatcherState {
        match self.lane.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            None => WatcherState::Stopped,
            Some(lane) if lane.lost.load(Ordering::SeqCst) => WatcherState::Lost,
            Some(_) => WatcherState::Running,
        }
    }

    /// Handles one event synchronously against the current rule snapshot.
    pub fn dispatch(&self, event: FileEvent) {
        self.core.dispatch(event);
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Core {
    fn dispatch(&self, event: FileEvent) {
        if event.path == self.store.rules_path() {
            match self.store.reload_rules() {
                // Files already waiting may match the new rules.
                Ok(true) => self.rescan("rules changed"),
                Ok(false) => {}
                Err(e) => self.reject_edit(&event.path, &e.to_string()),
            }
            return;
        }
        if event.path == self.store.settings_path() {
            if let Err(e) = self.store.reload_policy() {
                self.reject_edit(&event.path, &e.to_string());
            }
            return;
        }

        let snapshot = self.store.snapshot();
        if event.kind == FileEventKind::Modified {
            // Modifications only matter for files that have somewhere to go;
            // an unmatched file being written would otherwise be reported on
            // every write.
            let name = event
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if snapshot.rules.classify(&name).is_unmatched() {
                return;
            }
        }

        debug!(kind = ?event.kind, "dispatching {}", event.path.display());
        self.organizer.sort_one(&event.path, &snapshot.rules);
    }

    /// Sorts the whole root. A failure is already in the audit log.
    fn rescan(&self, reason: &str) {
        debug!("rescanning {}: {}", self.root.display(), reason);
        let snapshot = self.store.snapshot();
        if let Err(e) = self.organizer.sort_all(&snapshot.rules) {
            error!("rescan ({}) failed: {}", reason, e);
        }
    }

    fn reject_edit(&self, path: &Path, reason: &str) {
        warn!("ignoring edit to {}: {}", path.display(), reason);
        self.organizer.audit().record(&AuditRecord::new(
            AuditAction::ConfigRejected,
            path,
            format!("previous version stays in effect: {}", reason),
        ));
    }
}

struct Dispatcher {
    core: Arc<Core>,
    tx: Sender<Signal>,
    lost: Arc<AtomicBool>,
    recovered_at: Option<Instant>,
}

impl Dispatcher {
    fn run(mut self, mut subscription: RecommendedWatcher, rx: Receiver<Signal>) {
        while let Ok(signal) = rx.recv() {
            match signal {
                Signal::Stop => break,
                Signal::Fs(Ok(event)) if self.root_removed(&event) => {
                    if !self.recover(&mut subscription, "watched folder was removed or renamed") {
                        break;
                    }
                }
                Signal::Fs(Ok(event)) if event.need_rescan() => {
                    warn!("notifications for {} were dropped", self.core.root.display());
                    self.core.rescan("notifications dropped");
                }
                Signal::Fs(Ok(event)) => {
                    for file_event in FileEvent::from_notify(&event) {
                        self.core.dispatch(file_event);
                    }
                }
                Signal::Fs(Err(e)) => {
                    if !self.recover(&mut subscription, &e.to_string()) {
                        break;
                    }
                }
            }
        }
    }

    fn root_removed(&self, event: &Event) -> bool {
        let leaving = matches!(
            event.kind,
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From))
        );
        leaving && event.paths.iter().any(|p| p == &self.core.root)
    }

    /// Tries to re-establish the subscription once. Returns false when the
    /// lane has to give up.
    fn recover(&mut self, subscription: &mut RecommendedWatcher, reason: &str) -> bool {
        let root = &self.core.root;
        error!("watch subscription on {} lost: {}", root.display(), reason);

        let recently_recovered = self
            .recovered_at
            .is_some_and(|at| at.elapsed() < RESUBSCRIBE_WINDOW);

        let outcome = if recently_recovered {
            Err(format!("{} (again shortly after resubscribing)", reason))
        } else {
            let _ = subscription.unwatch(root);
            subscribe(root, self.tx.clone()).map_err(|e| e.to_string())
        };

        match outcome {
            Ok(replacement) => {
                *subscription = replacement;
                self.recovered_at = Some(Instant::now());
                warn!("resubscribed to {}, rescanning", root.display());
                self.core.rescan("resubscribed");
                true
            }
            Err(detail) => {
                error!("giving up on watching {}: {}", root.display(), detail);
                self.lost.store(true, Ordering::SeqCst);
                self.core.organizer.audit().record(&AuditRecord::new(
                    AuditAction::WatchLost,
                    root,
                    detail,
                ));
                false
            }
        }
    }
}

fn subscribe(root: &Path, tx: Sender<Signal>) -> Result<RecommendedWatcher, WatchError> {
    let subscribe_error = |source| WatchError::Subscribe {
        path: root.to_path_buf(),
        source,
    };

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        // The receiver is gone only after the lane has stopped.
        let _ = tx.send(Signal::Fs(res));
    })
    .map_err(subscribe_error)?;

    watcher
        .watch(root, RecursiveMode::NonRecursive)
        .map_err(subscribe_error)?;
    Ok(watcher)
}
