//! File change watcher.
//!
//! [`watch`] subscribes to OS notifications below a root and yields a
//! [`ChangeStream`] of filtered [`ChangeEvent`]s. Repeated `modified` events
//! for one path are coalesced on a trailing-edge window capped by
//! [`MAX_COALESCE_DELAY`]; any other kind flushes the pending `modified` for
//! that path first, so per-path order is preserved.
//!
//! Cancelling (or dropping) the stream stops the producer task, which drops
//! the OS watch handle. Events not yet taken from the stream are discarded.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::event::ModifyKind;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use xcmon_core::types::{ChangeEvent, ChangeKind};
use xcmon_core::MonitorConfig;

use crate::error::{io_err, DaemonError};
use crate::paths::{DEBOUNCE_WINDOW, MAX_COALESCE_DELAY};

/// Path components whose subtrees never produce events, unless the path
/// lies under one of [`WatchOptions::include_dirs`].
const IGNORED_COMPONENTS: &[&str] = &["DerivedData", ".git", "build", ".build"];

/// Root-relative build-log directory that sits below an ignored component.
const DEFAULT_LOG_DIR: &str = ".build/logs";

const STREAM_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    /// Lower-case extensions without the dot.
    pub extensions: Vec<String>,
    /// Root-relative directories watched even below an ignored component.
    pub include_dirs: Vec<PathBuf>,
    pub debounce: Duration,
    pub max_delay: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl WatchOptions {
    pub fn from_config(config: &MonitorConfig) -> Self {
        let debounce = if config.debounce().is_zero() {
            DEBOUNCE_WINDOW
        } else {
            config.debounce()
        };
        Self {
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            include_dirs: vec![PathBuf::from(DEFAULT_LOG_DIR)],
            debounce,
            max_delay: MAX_COALESCE_DELAY.max(debounce),
        }
    }

    /// Also watch every directory in `dirs` that lies below `root`.
    pub fn with_build_log_dirs(mut self, root: &Path, dirs: &[PathBuf]) -> Self {
        for dir in dirs {
            if let Ok(relative) = dir.strip_prefix(root) {
                let relative = relative.to_path_buf();
                if !relative.as_os_str().is_empty() && !self.include_dirs.contains(&relative) {
                    self.include_dirs.push(relative);
                }
            }
        }
        self
    }

    fn allows(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|allowed| *allowed == ext)
    }
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// Lazy, cancelable sequence of change events below one root.
#[derive(Debug)]
pub struct ChangeStream {
    root: PathBuf,
    events: mpsc::Receiver<ChangeEvent>,
    cancel: Option<oneshot::Sender<()>>,
}

impl ChangeStream {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Next event; waits without polling. `None` once cancelled or when the
    /// OS watch has gone away.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        if self.cancel.is_none() {
            return None;
        }
        self.events.recv().await
    }

    /// Stop production and drop anything already queued.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
            self.events.close();
            while self.events.try_recv().is_ok() {}
            tracing::debug!(root = %self.root.display(), "change stream cancelled");
        }
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Start watching `root` recursively.
pub fn watch(root: &Path, options: WatchOptions) -> Result<ChangeStream, DaemonError> {
    // FSEvents reports real paths (/private/var/... on macOS); watch the
    // canonical root so prefix checks line up.
    let root = fs::canonicalize(root).map_err(|e| io_err(root, e))?;

    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = raw_tx.send(event);
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    tracing::info!(root = %root.display(), "watcher started");

    let (events_tx, events_rx) = mpsc::channel(STREAM_BUFFER);
    let (cancel_tx, cancel_rx) = oneshot::channel();
    tokio::spawn(produce(
        watcher,
        root.clone(),
        options,
        raw_rx,
        events_tx,
        cancel_rx,
    ));

    Ok(ChangeStream {
        root,
        events: events_rx,
        cancel: Some(cancel_tx),
    })
}

async fn produce(
    watcher: RecommendedWatcher,
    root: PathBuf,
    options: WatchOptions,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    events_tx: mpsc::Sender<ChangeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let mut debouncer = Debouncer::new(options.debounce, options.max_delay);

    'produce: loop {
        let deadline = debouncer.next_deadline();
        let ready = tokio::select! {
            _ = &mut cancel_rx => break,
            raw = raw_rx.recv() => {
                let Some(raw) = raw else { break };
                match raw {
                    Ok(event) => {
                        let now = Instant::now();
                        let mut ready = Vec::new();
                        for (path, kind) in classify(&event, &root, &options) {
                            ready.extend(debouncer.push(path, kind, now, Utc::now()));
                        }
                        ready
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                }
            }
            _ = wait_until(deadline) => debouncer.due(Instant::now()),
        };

        for event in ready {
            tracing::debug!(path = %event.path.display(), kind = %event.kind, "change");
            if events_tx.send(event).await.is_err() {
                break 'produce;
            }
        }
    }

    drop(watcher);
    tracing::info!(root = %root.display(), "watcher stopped");
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Map a raw notification to filtered `(path, kind)` pairs.
fn classify(event: &Event, root: &Path, options: &WatchOptions) -> Vec<(PathBuf, ChangeKind)> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Renamed,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Deleted,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };
    event
        .paths
        .iter()
        .filter(|path| is_watched_path(path, root, options))
        .map(|path| (path.clone(), kind))
        .collect()
}

fn is_watched_path(path: &Path, root: &Path, options: &WatchOptions) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    if options.include_dirs.iter().any(|dir| relative.starts_with(dir)) {
        return options.allows(path);
    }
    let ignored = relative.components().any(|c| match c {
        Component::Normal(name) => name
            .to_str()
            .map(|n| IGNORED_COMPONENTS.contains(&n))
            .unwrap_or(false),
        _ => false,
    });
    !ignored && options.allows(path)
}

// ---------------------------------------------------------------------------
// Debounce
// ---------------------------------------------------------------------------

struct PendingModify {
    first_seen: Instant,
    last_seen: Instant,
    at: DateTime<Utc>,
}

/// Per-path coalescing of `modified` events.
pub(crate) struct Debouncer {
    window: Duration,
    max_delay: Duration,
    pending: HashMap<PathBuf, PendingModify>,
}

impl Debouncer {
    pub(crate) fn new(window: Duration, max_delay: Duration) -> Self {
        Self {
            window,
            max_delay,
            pending: HashMap::new(),
        }
    }

    /// Record one event; returns events that must be delivered now.
    pub(crate) fn push(
        &mut self,
        path: PathBuf,
        kind: ChangeKind,
        now: Instant,
        at: DateTime<Utc>,
    ) -> Vec<ChangeEvent> {
        if kind == ChangeKind::Modified {
            let entry = self.pending.entry(path).or_insert(PendingModify {
                first_seen: now,
                last_seen: now,
                at,
            });
            entry.last_seen = now;
            entry.at = at;
            return Vec::new();
        }

        let mut ready = Vec::with_capacity(2);
        if let Some(pending) = self.pending.remove(&path) {
            ready.push(ChangeEvent {
                path: path.clone(),
                kind: ChangeKind::Modified,
                at: pending.at,
            });
        }
        ready.push(ChangeEvent { path, kind, at });
        ready
    }

    fn release_at(&self, pending: &PendingModify) -> Instant {
        (pending.last_seen + self.window).min(pending.first_seen + self.max_delay)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| self.release_at(p)).min()
    }

    /// Pending `modified` events whose window has closed, oldest first.
    pub(crate) fn due(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let mut due: Vec<(Instant, PathBuf)> = self
            .pending
            .iter()
            .filter(|(_, p)| self.release_at(p) <= now)
            .map(|(path, p)| (p.first_seen, path.clone()))
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, path)| {
                let pending = self.pending.remove(&path)?;
                Some(ChangeEvent {
                    path,
                    kind: ChangeKind::Modified,
                    at: pending.at,
                })
            })
            .collect()
    }
}
