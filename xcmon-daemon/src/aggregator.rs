//! Diagnostics aggregator.
//!
//! One pass runs every adapter concurrently (each on the blocking pool, each
//! under its own timeout), merges and orders their records, and publishes a
//! new [`DiagnosticsSnapshot`] by replacing the shared `Arc`. Readers clone
//! the `Arc` under a short read lock and never see a partial merge.
//!
//! Passes are serialized by the [`Aggregator::run`] loop. Triggers that
//! arrive while a pass is pending fold into it, so at most one follow-up
//! pass is ever queued.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, watch, Mutex, Notify, RwLock};

use xcmon_core::types::{
    ChangeEvent, ChangeKind, DiagnosticRecord, DiagnosticsSnapshot, MonitoredProject, Origin,
    SourceReport, SourceStatus, UpdateQueueEntry,
};
use xcmon_resolver::BUILD_SERVER_CONFIG;
use xcmon_sources::{Collection, DiagnosticSource};

/// The project a pass runs against, tagged with the switch that made it active.
#[derive(Debug, Clone)]
pub struct ActiveProject {
    pub epoch: u64,
    pub project: Arc<MonitoredProject>,
}

/// Why a pass was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Change(ChangeEvent),
    Refresh,
    Tick,
}

/// Result of [`Aggregator::trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new pass will run.
    Scheduled,
    /// Folded into a pass that was already pending.
    Coalesced,
}

// ---------------------------------------------------------------------------
// Recent-updates queue
// ---------------------------------------------------------------------------

/// FIFO of the most recent triggering changes, bounded to `capacity`.
#[derive(Debug, Clone)]
pub struct UpdateQueue {
    entries: VecDeque<UpdateQueueEntry>,
    capacity: usize,
}

impl UpdateQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: UpdateQueueEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<UpdateQueueEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

struct Published {
    epoch: u64,
    snapshot: Arc<DiagnosticsSnapshot>,
}

#[derive(Default)]
struct PendingPass {
    requested: bool,
    /// Distinct triggering changes, first occurrence order.
    changes: Vec<ChangeEvent>,
    /// Position in `changes` of each (path, kind).
    index: HashMap<(PathBuf, ChangeKind), usize>,
}

impl PendingPass {
    /// Record `change`; a repeat of a known (path, kind) only refreshes its time.
    fn record(&mut self, change: ChangeEvent) {
        match self.index.entry((change.path.clone(), change.kind)) {
            Entry::Occupied(slot) => self.changes[*slot.get()].at = change.at,
            Entry::Vacant(slot) => {
                slot.insert(self.changes.len());
                self.changes.push(change);
            }
        }
    }

    fn take_changes(&mut self) -> Vec<ChangeEvent> {
        self.index.clear();
        std::mem::take(&mut self.changes)
    }
}

pub struct Aggregator {
    sources: Vec<Arc<dyn DiagnosticSource>>,
    adapter_timeout: Duration,
    published: RwLock<Published>,
    pending: Mutex<PendingPass>,
    wake: Notify,
    updates: Mutex<UpdateQueue>,
    passes: AtomicU64,
}

impl Aggregator {
    pub fn new(
        sources: Vec<Arc<dyn DiagnosticSource>>,
        adapter_timeout: Duration,
        updates_capacity: usize,
    ) -> Self {
        Self {
            sources,
            adapter_timeout,
            published: RwLock::new(Published {
                epoch: 0,
                snapshot: Arc::new(DiagnosticsSnapshot::default()),
            }),
            pending: Mutex::new(PendingPass::default()),
            wake: Notify::new(),
            updates: Mutex::new(UpdateQueue::new(updates_capacity)),
            passes: AtomicU64::new(0),
        }
    }

    /// Latest published snapshot; never waits for a pass.
    pub async fn snapshot(&self) -> Arc<DiagnosticsSnapshot> {
        self.published.read().await.snapshot.clone()
    }

    /// Number of passes that have run to completion (published or discarded).
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    pub async fn recent_updates(&self) -> Vec<UpdateQueueEntry> {
        self.updates.lock().await.entries()
    }

    pub async fn recent_updates_len(&self) -> usize {
        self.updates.lock().await.len()
    }

    /// Empty the recent-updates queue; the snapshot is untouched.
    pub async fn clear_updates(&self) -> usize {
        self.updates.lock().await.clear()
    }

    /// Request a pass.
    pub async fn trigger(&self, trigger: Trigger) -> TriggerOutcome {
        let outcome = {
            let mut pending = self.pending.lock().await;
            if let Trigger::Change(change) = trigger {
                pending.record(change);
            }
            if pending.requested {
                TriggerOutcome::Coalesced
            } else {
                pending.requested = true;
                TriggerOutcome::Scheduled
            }
        };
        if outcome == TriggerOutcome::Scheduled {
            self.wake.notify_one();
        }
        outcome
    }

    /// Discard all state tied to the previous project and start `epoch` from
    /// an empty snapshot. Late results from older epochs are dropped.
    pub async fn reset(&self, epoch: u64, project_root: Option<PathBuf>) {
        let mut published = self.published.write().await;
        let generation = published.snapshot.generation + 1;
        published.epoch = epoch;
        published.snapshot = Arc::new(DiagnosticsSnapshot::empty(generation, project_root));
        self.updates.lock().await.clear();
        self.pending.lock().await.take_changes();
        tracing::debug!(epoch, generation, "aggregator reset");
    }

    /// Serve pass requests until shutdown.
    pub async fn run(
        self: Arc<Self>,
        projects: watch::Receiver<Option<ActiveProject>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = self.wake.notified() => {}
            }

            loop {
                let changes = {
                    let mut pending = self.pending.lock().await;
                    if !pending.requested {
                        break;
                    }
                    pending.requested = false;
                    pending.take_changes()
                };
                let active = projects.borrow().clone();
                let Some(active) = active else {
                    tracing::debug!("pass requested with no project configured");
                    continue;
                };
                self.aggregate(&active, changes).await;
            }
        }
    }

    /// Run one pass for `active` and publish it. Returns the new generation,
    /// or `None` when the project switched while the pass was running.
    pub async fn aggregate(&self, active: &ActiveProject, changes: Vec<ChangeEvent>) -> Option<u64> {
        let started = Instant::now();
        let results = self.collect_all(&active.project).await;

        let mut reports = Vec::with_capacity(results.len());
        let mut records = Vec::new();
        for (origin, collection) in results {
            reports.push(collection.report(origin));
            records.extend(collection.records);
        }
        let records = merge(records);

        let published = self.publish(active, records, reports, changes).await;
        self.passes.fetch_add(1, Ordering::SeqCst);
        if let Some(generation) = published {
            tracing::debug!(
                generation,
                duration_ms = started.elapsed().as_millis() as u64,
                "aggregation pass finished",
            );
        }
        published
    }

    async fn collect_all(&self, project: &Arc<MonitoredProject>) -> Vec<(Origin, Collection)> {
        let handles: Vec<_> = self
            .sources
            .iter()
            .map(|source| {
                let source = source.clone();
                let project = project.clone();
                let timeout = self.adapter_timeout;
                let origin = source.origin();
                let handle = tokio::spawn(async move {
                    let blocking = tokio::task::spawn_blocking(move || source.collect(&project));
                    match tokio::time::timeout(timeout, blocking).await {
                        Ok(Ok(collection)) => collection,
                        Ok(Err(err)) => Collection::unavailable(format!("adapter task failed: {err}")),
                        Err(_) => Collection::unavailable(format!(
                            "timed out after {} ms",
                            timeout.as_millis()
                        )),
                    }
                });
                (origin, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (origin, handle) in handles {
            let collection = handle
                .await
                .unwrap_or_else(|err| Collection::unavailable(format!("adapter task failed: {err}")));
            results.push((origin, collection));
        }
        results
    }

    async fn publish(
        &self,
        active: &ActiveProject,
        records: Vec<DiagnosticRecord>,
        reports: Vec<SourceReport>,
        changes: Vec<ChangeEvent>,
    ) -> Option<u64> {
        let mut published = self.published.write().await;
        if published.epoch != active.epoch {
            tracing::warn!(
                pass_epoch = active.epoch,
                current_epoch = published.epoch,
                root = %active.project.path.display(),
                "discarding aggregation result for a replaced project",
            );
            return None;
        }

        log_source_transitions(&published.snapshot.sources, &reports);
        let previous_count = published.snapshot.records.len();
        let generation = published.snapshot.generation + 1;
        let snapshot = DiagnosticsSnapshot {
            generation,
            project_root: Some(active.project.path.clone()),
            records,
            sources: reports,
            completed_at: Some(Utc::now()),
        };
        if snapshot.records.len() != previous_count || !changes.is_empty() {
            tracing::info!(
                generation,
                records = snapshot.records.len(),
                changes = changes.len(),
                "published diagnostics snapshot",
            );
        }
        published.snapshot = Arc::new(snapshot);

        // Still under the write lock: a concurrent reset cannot interleave.
        let mut updates = self.updates.lock().await;
        for change in changes {
            if !active.project.contains(&change.path) {
                continue;
            }
            updates.push(UpdateQueueEntry {
                origin: origin_for_path(&active.project, &change.path),
                path: change.path,
                kind: change.kind,
                at: change.at,
            });
        }
        Some(generation)
    }
}

/// Deduplicate on (origin, file, line, message), keeping the latest
/// detection, then order for publication.
pub fn merge(records: Vec<DiagnosticRecord>) -> Vec<DiagnosticRecord> {
    type Key = (Origin, Option<PathBuf>, Option<u32>, String);
    let mut latest: HashMap<Key, DiagnosticRecord> = HashMap::with_capacity(records.len());
    for record in records {
        let key = (
            record.origin,
            record.file.clone(),
            record.line,
            record.message.clone(),
        );
        match latest.entry(key) {
            Entry::Occupied(mut slot) => {
                if record.detected_at > slot.get().detected_at {
                    slot.insert(record);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }
    let mut merged: Vec<_> = latest.into_values().collect();
    merged.sort_by(|a, b| a.snapshot_order(b));
    merged
}

/// Adapter most likely affected by a change at `path`.
fn origin_for_path(project: &MonitoredProject, path: &Path) -> Option<Origin> {
    if path.file_name().and_then(|n| n.to_str()) == Some(BUILD_SERVER_CONFIG) {
        return Some(Origin::BuildServerConfig);
    }
    if project
        .artifacts
        .build_log_dirs
        .iter()
        .any(|dir| path.starts_with(dir))
    {
        return Some(Origin::BuildLog);
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("xcdiagnostics") => Some(Origin::LiveCompiler),
        Some("swift" | "m" | "mm" | "h" | "c" | "cpp") => Some(Origin::LanguageServer),
        Some("log") => Some(Origin::BuildLog),
        _ => None,
    }
}

fn log_source_transitions(previous: &[SourceReport], current: &[SourceReport]) {
    for report in current {
        let before = previous.iter().find(|p| p.origin == report.origin);
        let changed = before.map(|b| b.status != report.status).unwrap_or(true);
        match &report.status {
            SourceStatus::Ok => {
                if before.map(|b| !b.status.is_ok()).unwrap_or(false) {
                    tracing::info!(origin = %report.origin, "source recovered");
                }
            }
            SourceStatus::Degraded { reason } if changed => {
                tracing::warn!(origin = %report.origin, reason = %reason, "source degraded");
            }
            SourceStatus::Unavailable { reason } if changed => {
                tracing::warn!(origin = %report.origin, reason = %reason, "source unavailable");
            }
            SourceStatus::Degraded { reason } | SourceStatus::Unavailable { reason } => {
                tracing::debug!(origin = %report.origin, reason = %reason, "source still not ok");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use chrono::{DateTime, Duration as ChronoDuration};
    use xcmon_core::types::{ArtifactPaths, Severity};

    struct FixedSource {
        origin: Origin,
        records: Vec<DiagnosticRecord>,
        status: SourceStatus,
    }

    impl DiagnosticSource for FixedSource {
        fn origin(&self) -> Origin {
            self.origin
        }

        fn collect(&self, _project: &MonitoredProject) -> Collection {
            Collection {
                records: self.records.clone(),
                status: self.status.clone(),
                skipped: 0,
            }
        }
    }

    struct SlowSource {
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl DiagnosticSource for SlowSource {
        fn origin(&self) -> Origin {
            Origin::LanguageServer
        }

        fn collect(&self, _project: &MonitoredProject) -> Collection {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Collection::ok(Vec::new())
        }
    }

    fn active(epoch: u64) -> ActiveProject {
        ActiveProject {
            epoch,
            project: Arc::new(MonitoredProject {
                path: PathBuf::from("/work/App"),
                valid: true,
                workspaces: Vec::new(),
                projects: Vec::new(),
                referenced_projects: Vec::new(),
                schemes: Vec::new(),
                artifacts: ArtifactPaths {
                    build_log_dirs: vec![PathBuf::from("/work/App/.build/logs")],
                    ..ArtifactPaths::default()
                },
                discovered_at: Utc::now(),
            }),
        }
    }

    fn record(origin: Origin, file: &str, line: u32, message: &str, at: DateTime<Utc>) -> DiagnosticRecord {
        DiagnosticRecord {
            severity: Severity::Error,
            origin,
            file: Some(PathBuf::from(file)),
            line: Some(line),
            column: None,
            message: message.to_string(),
            detected_at: at,
        }
    }

    fn change(path: &str) -> ChangeEvent {
        ChangeEvent {
            path: PathBuf::from(path),
            kind: ChangeKind::Modified,
            at: Utc::now(),
        }
    }

    fn fixed(origin: Origin, records: Vec<DiagnosticRecord>) -> Arc<dyn DiagnosticSource> {
        Arc::new(FixedSource {
            origin,
            records,
            status: SourceStatus::Ok,
        })
    }

    #[test]
    fn duplicates_keep_latest_timestamp() {
        let early = Utc::now() - ChronoDuration::seconds(30);
        let late = Utc::now();
        let merged = merge(vec![
            record(Origin::BuildLog, "/a.swift", 3, "boom", early),
            record(Origin::BuildLog, "/a.swift", 3, "boom", late),
            record(Origin::LiveCompiler, "/a.swift", 3, "boom", early),
        ]);
        assert_eq!(merged.len(), 2, "origin is part of the identity");
        let build_log = merged.iter().find(|r| r.origin == Origin::BuildLog).expect("build log record");
        assert_eq!(build_log.detected_at, late);
    }

    #[test]
    fn queue_keeps_newest_capacity_entries() {
        let mut queue = UpdateQueue::new(3);
        for n in 0..5 {
            queue.push(UpdateQueueEntry {
                path: PathBuf::from(format!("/p/{n}.swift")),
                kind: ChangeKind::Modified,
                origin: None,
                at: Utc::now(),
            });
        }
        let paths: Vec<_> = queue.entries().into_iter().map(|e| e.path).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/p/2.swift"),
                PathBuf::from("/p/3.swift"),
                PathBuf::from("/p/4.swift"),
            ]
        );
        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn pending_changes_collapse_per_path_and_kind() {
        let mut pending = PendingPass::default();
        for n in 0..1000 {
            pending.record(change(&format!("/work/App/f{}.swift", n % 10)));
        }
        let last = change("/work/App/f3.swift");
        let last_at = last.at;
        pending.record(last);
        pending.record(ChangeEvent {
            kind: ChangeKind::Deleted,
            ..change("/work/App/f3.swift")
        });

        let changes = pending.take_changes();
        assert_eq!(changes.len(), 11);
        assert_eq!(changes[0].path, PathBuf::from("/work/App/f0.swift"));
        assert_eq!(changes[3].at, last_at);
        assert_eq!(changes[10].kind, ChangeKind::Deleted);
        assert!(pending.index.is_empty());
        assert!(pending.take_changes().is_empty());
    }

    #[tokio::test]
    async fn dedup_across_adapters_publishes_one_record() {
        let early = Utc::now() - ChronoDuration::seconds(5);
        let late = Utc::now();
        let aggregator = Aggregator::new(
            vec![
                fixed(Origin::BuildLog, vec![record(Origin::BuildLog, "/work/App/a.swift", 1, "dup", early)]),
                fixed(Origin::LiveCompiler, vec![record(Origin::BuildLog, "/work/App/a.swift", 1, "dup", late)]),
            ],
            Duration::from_secs(3),
            100,
        );
        let generation = aggregator.aggregate(&active(0), Vec::new()).await;
        assert_eq!(generation, Some(1));

        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].detected_at, late);
        assert_eq!(snapshot.sources.len(), 2);
    }

    #[tokio::test]
    async fn failing_source_does_not_block_others() {
        let aggregator = Aggregator::new(
            vec![
                Arc::new(FixedSource {
                    origin: Origin::LanguageServer,
                    records: Vec::new(),
                    status: SourceStatus::unavailable("socket missing"),
                }),
                fixed(Origin::BuildLog, vec![record(Origin::BuildLog, "/work/App/b.swift", 2, "kept", Utc::now())]),
            ],
            Duration::from_secs(3),
            100,
        );
        aggregator.aggregate(&active(0), Vec::new()).await;
        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot.records.len(), 1);
        let lsp = snapshot.source(Origin::LanguageServer).expect("lsp report");
        assert!(lsp.status.is_unavailable());
    }

    #[tokio::test]
    async fn slow_source_times_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let aggregator = Aggregator::new(
            vec![Arc::new(SlowSource {
                delay: Duration::from_millis(500),
                calls: calls.clone(),
            })],
            Duration::from_millis(50),
            100,
        );
        aggregator.aggregate(&active(0), Vec::new()).await;
        let snapshot = aggregator.snapshot().await;
        let report = snapshot.source(Origin::LanguageServer).expect("report");
        assert!(report.status.is_unavailable());
        assert_eq!(snapshot.generation, 1);
    }

    #[tokio::test]
    async fn generations_increase_and_reset_discards_late_results() {
        let aggregator = Aggregator::new(vec![fixed(Origin::BuildLog, Vec::new())], Duration::from_secs(3), 100);
        assert_eq!(aggregator.aggregate(&active(0), Vec::new()).await, Some(1));
        assert_eq!(aggregator.aggregate(&active(0), Vec::new()).await, Some(2));

        aggregator.reset(1, Some(PathBuf::from("/work/Other"))).await;
        let reset = aggregator.snapshot().await;
        assert_eq!(reset.generation, 3);
        assert!(reset.records.is_empty());

        // A pass tagged with the old epoch is dropped.
        assert_eq!(aggregator.aggregate(&active(0), vec![change("/work/App/x.swift")]).await, None);
        assert_eq!(aggregator.snapshot().await.generation, 3);
        assert!(aggregator.recent_updates().await.is_empty());

        assert_eq!(aggregator.aggregate(&active(1), Vec::new()).await, Some(4));
    }

    #[tokio::test]
    async fn one_entry_per_distinct_change() {
        let aggregator = Aggregator::new(vec![fixed(Origin::BuildLog, Vec::new())], Duration::from_secs(3), 100);
        assert_eq!(aggregator.trigger(Trigger::Change(change("/work/App/a.swift"))).await, TriggerOutcome::Scheduled);
        assert_eq!(aggregator.trigger(Trigger::Change(change("/work/App/a.swift"))).await, TriggerOutcome::Coalesced);
        assert_eq!(
            aggregator.trigger(Trigger::Change(change("/work/App/.build/logs/build.log"))).await,
            TriggerOutcome::Coalesced
        );

        let changes = aggregator.pending.lock().await.take_changes();
        aggregator.aggregate(&active(0), changes).await;

        let updates = aggregator.recent_updates().await;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].origin, Some(Origin::LanguageServer));
        assert_eq!(updates[1].origin, Some(Origin::BuildLog));
        // Diagnostics and updates are independent.
        assert_eq!(aggregator.clear_updates().await, 2);
        assert_eq!(aggregator.snapshot().await.generation, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn trigger_storm_during_pass_coalesces_to_one_follow_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let aggregator = Arc::new(Aggregator::new(
            vec![Arc::new(SlowSource {
                delay: Duration::from_millis(300),
                calls: calls.clone(),
            })],
            Duration::from_secs(3),
            100,
        ));
        let (_project_tx, project_rx) = watch::channel(Some(active(0)));
        let (shutdown_tx, _) = broadcast::channel(1);
        let runner = tokio::spawn(aggregator.clone().run(project_rx, shutdown_tx.subscribe()));

        aggregator.trigger(Trigger::Refresh).await;
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut coalesced = 0;
        for n in 0..100 {
            let outcome = aggregator
                .trigger(Trigger::Change(change(&format!("/work/App/f{n}.swift"))))
                .await;
            if outcome == TriggerOutcome::Coalesced {
                coalesced += 1;
            }
        }
        assert_eq!(coalesced, 99);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2, "one running pass plus one follow-up");
        assert_eq!(aggregator.passes(), 2);
        assert_eq!(aggregator.recent_updates_len().await, 100);

        let _ = shutdown_tx.send(());
        runner.await.expect("runner");
    }
}
