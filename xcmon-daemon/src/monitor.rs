//! Monitor core: the operations the tool protocol exposes.
//!
//! The active project lives in a `watch` channel so the aggregator loop and
//! the watcher supervisor observe switches without polling. Switches are
//! serialized by `switch`; each one bumps the epoch that tags later passes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use xcmon_core::types::{
    BuildServerStatus, ChangeEvent, DiagnosticRecord, DiagnosticsSnapshot, MonitoredProject,
    SourceReport, SourceStatus, UpdateQueueEntry,
};
use xcmon_core::{MonitorConfig, MonitorError};
use xcmon_resolver::{most_recent_build_log, ResolverOptions};
use xcmon_sources::{
    default_sources, inspect_build_server, probe_language_server, read_live_diagnostics,
    DiagnosticSource,
};

use crate::aggregator::{ActiveProject, Aggregator, Trigger, TriggerOutcome};

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageServerStatus {
    pub socket: PathBuf,
    pub reachable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildLogInfo {
    pub path: PathBuf,
    pub age_secs: u64,
}

/// Composite answer of `get_project_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub project: MonitoredProject,
    pub build_server: BuildServerStatus,
    pub language_server: LanguageServerStatus,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub passes: u64,
    pub sources: Vec<SourceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_log: Option<BuildLogInfo>,
    pub recent_updates: usize,
}

/// Fresh read of Xcode's live issue documents, outside the aggregation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveDiagnostics {
    pub status: SourceStatus,
    pub records: Vec<DiagnosticRecord>,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub struct Monitor {
    options: ResolverOptions,
    aggregator: Arc<Aggregator>,
    active: watch::Sender<Option<ActiveProject>>,
    switch: Mutex<u64>,
}

impl Monitor {
    pub fn new(config: &MonitorConfig, home: &Path) -> Self {
        Self::with_sources(config, home, default_sources(config))
    }

    pub fn with_sources(
        config: &MonitorConfig,
        home: &Path,
        sources: Vec<Arc<dyn DiagnosticSource>>,
    ) -> Self {
        let aggregator = Aggregator::new(
            sources,
            config.adapter_timeout(),
            config.recent_updates_capacity,
        );
        let (active, _) = watch::channel(None);
        Self {
            options: ResolverOptions::from_config(config, home),
            aggregator: Arc::new(aggregator),
            active,
            switch: Mutex::new(0),
        }
    }

    pub fn aggregator(&self) -> Arc<Aggregator> {
        self.aggregator.clone()
    }

    /// Observe project switches.
    pub fn subscribe(&self) -> watch::Receiver<Option<ActiveProject>> {
        self.active.subscribe()
    }

    pub fn project(&self) -> Option<Arc<MonitoredProject>> {
        self.active.borrow().as_ref().map(|a| a.project.clone())
    }

    fn require_project(&self) -> Result<Arc<MonitoredProject>, MonitorError> {
        self.project().ok_or(MonitorError::NoProjectConfigured)
    }

    pub fn get_project_path(&self) -> Result<PathBuf, MonitorError> {
        self.require_project().map(|p| p.path.clone())
    }

    /// Resolve `path` and make it the monitored root.
    ///
    /// On failure nothing changes. On success the previous snapshot and
    /// recent updates are discarded and a pass is scheduled.
    pub async fn set_project_path(&self, path: &Path) -> Result<Arc<MonitoredProject>, MonitorError> {
        let mut epoch = self.switch.lock().await;

        let requested = path.to_path_buf();
        let options = self.options.clone();
        let project = blocking(move || xcmon_resolver::resolve(&requested, &options)).await?;
        let project = Arc::new(project);

        *epoch += 1;
        self.aggregator
            .reset(*epoch, Some(project.path.clone()))
            .await;
        self.active.send_replace(Some(ActiveProject {
            epoch: *epoch,
            project: project.clone(),
        }));
        self.aggregator.trigger(Trigger::Refresh).await;

        tracing::info!(
            root = %project.path.display(),
            epoch = *epoch,
            workspaces = project.workspaces.len(),
            projects = project.projects.len(),
            "monitored project switched",
        );
        Ok(project)
    }

    /// Latest published snapshot. Never waits for a pass.
    pub async fn get_diagnostics(&self) -> Arc<DiagnosticsSnapshot> {
        self.aggregator.snapshot().await
    }

    pub async fn get_project_status(&self) -> Result<ProjectStatus, MonitorError> {
        let project = self.require_project()?;
        let snapshot = self.aggregator.snapshot().await;
        let recent_updates = self.aggregator.recent_updates_len().await;

        let probe_target = project.clone();
        let (build_server, reachable, build_log) = blocking(move || {
            let artifacts = &probe_target.artifacts;
            let (build_server, _) = inspect_build_server(&artifacts.build_server_config);
            let reachable = probe_language_server(&artifacts.language_server_socket);
            let build_log = most_recent_build_log(&artifacts.build_log_dirs).map(|log| BuildLogInfo {
                age_secs: SystemTime::now()
                    .duration_since(log.modified)
                    .unwrap_or_default()
                    .as_secs(),
                path: log.path,
            });
            (build_server, reachable, build_log)
        })
        .await;

        Ok(ProjectStatus {
            language_server: LanguageServerStatus {
                socket: project.artifacts.language_server_socket.clone(),
                reachable,
            },
            project: project.as_ref().clone(),
            build_server,
            generation: snapshot.generation,
            completed_at: snapshot.completed_at,
            passes: self.aggregator.passes(),
            sources: snapshot.sources.clone(),
            build_log,
            recent_updates,
        })
    }

    pub async fn get_build_server_status(&self) -> Result<BuildServerStatus, MonitorError> {
        let project = self.require_project()?;
        let config_path = project.artifacts.build_server_config.clone();
        Ok(blocking(move || inspect_build_server(&config_path).0).await)
    }

    /// Oldest first.
    pub async fn get_recent_updates(&self) -> Vec<UpdateQueueEntry> {
        self.aggregator.recent_updates().await
    }

    /// Empty the recent-updates queue. Returns how many entries were dropped.
    pub async fn clear_diagnostics_queue(&self) -> usize {
        let cleared = self.aggregator.clear_updates().await;
        tracing::debug!(cleared, "recent updates cleared");
        cleared
    }

    pub async fn get_xcode_live_diagnostics(&self) -> Result<LiveDiagnostics, MonitorError> {
        let project = self.require_project()?;
        let collection = blocking(move || read_live_diagnostics(&project)).await;
        Ok(LiveDiagnostics {
            status: collection.status,
            records: collection.records,
        })
    }

    /// Feed one watcher event into the aggregation cycle.
    pub async fn notify_change(&self, event: ChangeEvent) -> TriggerOutcome {
        self.aggregator.trigger(Trigger::Change(event)).await
    }

    pub async fn refresh(&self) -> TriggerOutcome {
        self.aggregator.trigger(Trigger::Refresh).await
    }

    /// Periodic tick; a no-op until a project is set.
    pub async fn tick(&self) -> Option<TriggerOutcome> {
        if self.project().is_none() {
            return None;
        }
        Some(self.aggregator.trigger(Trigger::Tick).await)
    }
}

/// Run `f` on the blocking pool. A panic inside `f` resumes on the caller.
async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(err) => std::panic::resume_unwind(err.into_panic()),
    }
}
