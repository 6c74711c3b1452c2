//! Domain types for the xcmon monitoring engine.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Every type crossing the tool boundary is serde-serializable.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Severity of a normalized finding. Declaration order is sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    /// Parse the severity keyword used by compiler text output.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal error" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            "note" | "remark" | "info" => Some(Severity::Note),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// Diagnostic source a record came from. Declaration order is sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    BuildLog,
    LanguageServer,
    LiveCompiler,
    BuildServerConfig,
}

impl Origin {
    pub fn all() -> [Origin; 4] {
        [
            Origin::BuildLog,
            Origin::LanguageServer,
            Origin::LiveCompiler,
            Origin::BuildServerConfig,
        ]
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::BuildLog => write!(f, "build-log"),
            Origin::LanguageServer => write!(f, "language-server"),
            Origin::LiveCompiler => write!(f, "live-compiler"),
            Origin::BuildServerConfig => write!(f, "build-server-config"),
        }
    }
}

/// Kind of filesystem mutation reported by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "created"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::Renamed => write!(f, "renamed"),
        }
    }
}

/// Per-adapter availability signal. Never raised as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SourceStatus {
    #[default]
    Ok,
    /// The source answered but its payload was partly or wholly unrecognized.
    Degraded { reason: String },
    /// The source could not be reached or timed out.
    Unavailable { reason: String },
}

impl SourceStatus {
    pub fn degraded(reason: impl Into<String>) -> Self {
        SourceStatus::Degraded {
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        SourceStatus::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, SourceStatus::Ok)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, SourceStatus::Unavailable { .. })
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// One normalized finding.
///
/// `file`, `line` and `column` are present only when the originating source
/// supplied them; project-level records carry none of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub severity: Severity,
    pub origin: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

impl DiagnosticRecord {
    /// Project-level record with no location, detected now.
    pub fn project_level(severity: Severity, origin: Origin, message: impl Into<String>) -> Self {
        Self {
            severity,
            origin,
            file: None,
            line: None,
            column: None,
            message: message.into(),
            detected_at: Utc::now(),
        }
    }

    pub fn at_location(mut self, file: impl Into<PathBuf>, line: Option<u32>, column: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self.column = column;
        self
    }

    /// Identity used for deduplication: origin, file, line and message text.
    pub fn dedup_key(&self) -> (Origin, Option<&Path>, Option<u32>, &str) {
        (self.origin, self.file.as_deref(), self.line, self.message.as_str())
    }

    /// Deterministic snapshot order: severity, file (pathless last), line
    /// (lineless last), origin, then column and message as tie-breakers.
    pub fn snapshot_order(&self, other: &Self) -> Ordering {
        self.severity
            .cmp(&other.severity)
            .then_with(|| none_last(self.file.as_ref(), other.file.as_ref()))
            .then_with(|| none_last(self.line.as_ref(), other.line.as_ref()))
            .then_with(|| self.origin.cmp(&other.origin))
            .then_with(|| none_last(self.column.as_ref(), other.column.as_ref()))
            .then_with(|| self.message.cmp(&other.message))
    }
}

fn none_last<T: Ord>(a: Option<&T>, b: Option<&T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Outcome of one adapter during one aggregation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub origin: Origin,
    pub status: SourceStatus,
    pub record_count: usize,
    pub skipped_lines: usize,
}

/// Immutable, atomically-published view of aggregated diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiagnosticsSnapshot {
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,
    pub records: Vec<DiagnosticRecord>,
    #[serde(default)]
    pub sources: Vec<SourceReport>,
    /// Completion time of the pass that produced this snapshot; `None` for a
    /// reset snapshot that no pass has filled yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DiagnosticsSnapshot {
    pub fn empty(generation: u64, project_root: Option<PathBuf>) -> Self {
        Self {
            generation,
            project_root,
            records: Vec::new(),
            sources: Vec::new(),
            completed_at: None,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.records.iter().filter(|r| r.severity == severity).count()
    }

    pub fn source(&self, origin: Origin) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.origin == origin)
    }
}

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

/// One filtered filesystem change under the monitored root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub at: DateTime<Utc>,
}

/// Bounded-history record of a change that triggered an aggregation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateQueueEntry {
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// Adapter most likely affected by the change, when one can be inferred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Project & artifacts
// ---------------------------------------------------------------------------

/// Known artifact locations for a monitored root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ArtifactPaths {
    pub build_server_config: PathBuf,
    pub build_log_dirs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_diagnostics_dir: Option<PathBuf>,
    pub language_server_socket: PathBuf,
}

/// The active root under observation. Replaced wholesale, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredProject {
    /// Absolute root path.
    pub path: PathBuf,
    pub valid: bool,
    #[serde(default)]
    pub workspaces: Vec<PathBuf>,
    #[serde(default)]
    pub projects: Vec<PathBuf>,
    /// Projects a workspace references that are not themselves under the root scan.
    #[serde(default)]
    pub referenced_projects: Vec<PathBuf>,
    #[serde(default)]
    pub schemes: Vec<String>,
    pub artifacts: ArtifactPaths,
    pub discovered_at: DateTime<Utc>,
}

impl MonitoredProject {
    /// True when `path` is the root or lies below it.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.path)
    }

    /// Every discovered marker, workspaces first.
    pub fn markers(&self) -> impl Iterator<Item = &PathBuf> {
        self.workspaces.iter().chain(self.projects.iter())
    }
}

/// Derived view of `buildServer.json` presence and validity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildServerStatus {
    pub config_path: PathBuf,
    pub exists: bool,
    pub parses: bool,
    #[serde(default)]
    pub missing_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_root: Option<PathBuf>,
}

impl BuildServerStatus {
    pub fn missing(config_path: PathBuf) -> Self {
        Self {
            config_path,
            exists: false,
            parses: false,
            missing_keys: Vec::new(),
            name: None,
            scheme: None,
            workspace: None,
            workspace_exists: None,
            build_root: None,
        }
    }

    /// Present, parseable and carrying every required key.
    pub fn is_valid(&self) -> bool {
        self.exists && self.parses && self.missing_keys.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(severity: Severity, file: Option<&str>, line: Option<u32>, origin: Origin) -> DiagnosticRecord {
        DiagnosticRecord {
            severity,
            origin,
            file: file.map(PathBuf::from),
            line,
            column: None,
            message: "m".to_string(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn severity_orders_error_first() {
        assert!(Severity::Error < Severity::Warning);
        assert!(Severity::Warning < Severity::Note);
    }

    #[test]
    fn severity_keywords() {
        assert_eq!(Severity::from_keyword("error"), Some(Severity::Error));
        assert_eq!(Severity::from_keyword(" Warning "), Some(Severity::Warning));
        assert_eq!(Severity::from_keyword("note"), Some(Severity::Note));
        assert_eq!(Severity::from_keyword("panic"), None);
    }

    #[test]
    fn pathless_records_sort_last_within_severity() {
        let mut records = vec![
            record(Severity::Warning, None, None, Origin::BuildServerConfig),
            record(Severity::Warning, Some("b.swift"), Some(1), Origin::BuildLog),
            record(Severity::Error, None, None, Origin::BuildLog),
            record(Severity::Warning, Some("a.swift"), Some(9), Origin::BuildLog),
            record(Severity::Warning, Some("a.swift"), Some(2), Origin::LiveCompiler),
        ];
        records.sort_by(|a, b| a.snapshot_order(b));

        let order: Vec<_> = records
            .iter()
            .map(|r| (r.severity, r.file.clone(), r.line))
            .collect();
        assert_eq!(
            order,
            vec![
                (Severity::Error, None, None),
                (Severity::Warning, Some(PathBuf::from("a.swift")), Some(2)),
                (Severity::Warning, Some(PathBuf::from("a.swift")), Some(9)),
                (Severity::Warning, Some(PathBuf::from("b.swift")), Some(1)),
                (Severity::Warning, None, None),
            ]
        );
    }

    #[test]
    fn origin_breaks_ties_on_same_location() {
        let a = record(Severity::Error, Some("x.swift"), Some(3), Origin::LiveCompiler);
        let b = record(Severity::Error, Some("x.swift"), Some(3), Origin::BuildLog);
        assert_eq!(a.snapshot_order(&b), Ordering::Greater);
    }

    #[test]
    fn origin_serializes_kebab_case() {
        let json = serde_json::to_string(&Origin::BuildServerConfig).expect("serialize");
        assert_eq!(json, "\"build-server-config\"");
        assert_eq!(Origin::LanguageServer.to_string(), "language-server");
    }

    #[test]
    fn source_status_is_tagged() {
        let json = serde_json::to_value(SourceStatus::unavailable("socket missing")).expect("serialize");
        assert_eq!(json["state"], "unavailable");
        assert_eq!(json["reason"], "socket missing");
    }

    #[test]
    fn build_server_status_validity() {
        let mut status = BuildServerStatus::missing(PathBuf::from("/p/buildServer.json"));
        assert!(!status.is_valid());
        status.exists = true;
        status.parses = true;
        assert!(status.is_valid());
        status.missing_keys.push("argv".to_string());
        assert!(!status.is_valid());
    }
}
