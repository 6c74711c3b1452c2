//! # xcmon-sources
//!
//! Diagnostic source adapters. Each adapter turns one source-specific payload
//! into normalized [`DiagnosticRecord`]s:
//!
//! - [`build_log::BuildLogSource`] — compiler text output and xclogparser reports
//! - [`language_server::LanguageServerSource`] — LSP over a local socket
//! - [`live_compiler::LiveCompilerSource`] — Xcode's `*.xcdiagnostics` files
//! - [`build_server::BuildServerSource`] — `buildServer.json` validation
//!
//! Adapters are synchronous and never fail: problems are reported through
//! [`Collection::status`]. The caller owns scheduling and timeouts.

pub mod build_log;
pub mod build_server;
pub mod codec;
pub mod error;
pub mod language_server;
pub mod live_compiler;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use xcmon_core::types::{DiagnosticRecord, MonitoredProject, Origin, SourceReport, SourceStatus};
use xcmon_core::MonitorConfig;

pub use build_log::BuildLogSource;
pub use build_server::{inspect_build_server, BuildServerSource};
pub use error::SourceError;
pub use language_server::{probe_language_server, LanguageServerSource};
pub use live_compiler::{read_live_diagnostics, LiveCompilerSource};

/// One adapter's output for one aggregation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Collection {
    pub records: Vec<DiagnosticRecord>,
    pub status: SourceStatus,
    /// Input lines the adapter could not interpret.
    pub skipped: usize,
}

impl Collection {
    pub fn ok(records: Vec<DiagnosticRecord>) -> Self {
        Self {
            records,
            status: SourceStatus::Ok,
            skipped: 0,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            status: SourceStatus::unavailable(reason),
            skipped: 0,
        }
    }

    pub fn degraded(reason: impl Into<String>, records: Vec<DiagnosticRecord>) -> Self {
        Self {
            records,
            status: SourceStatus::degraded(reason),
            skipped: 0,
        }
    }

    pub fn with_skipped(mut self, skipped: usize) -> Self {
        self.skipped = skipped;
        self
    }

    pub fn report(&self, origin: Origin) -> SourceReport {
        SourceReport {
            origin,
            status: self.status.clone(),
            record_count: self.records.len(),
            skipped_lines: self.skipped,
        }
    }
}

impl From<SourceError> for Collection {
    fn from(err: SourceError) -> Self {
        Collection::unavailable(err.to_string())
    }
}

/// A diagnostic source polled once per aggregation pass.
pub trait DiagnosticSource: Send + Sync {
    fn origin(&self) -> Origin;

    /// Collect current records for `project`. May block on I/O.
    fn collect(&self, project: &MonitoredProject) -> Collection;
}

/// The four adapters in origin order.
pub fn default_sources(config: &MonitorConfig) -> Vec<Arc<dyn DiagnosticSource>> {
    vec![
        Arc::new(BuildLogSource),
        Arc::new(LanguageServerSource::new(io_timeout(config))),
        Arc::new(LiveCompilerSource::default()),
        Arc::new(BuildServerSource),
    ]
}

/// Socket read budget for one language-server exchange; stays under the
/// aggregator's per-adapter timeout so the adapter reports its own reason.
fn io_timeout(config: &MonitorConfig) -> Duration {
    let budget = config.adapter_timeout();
    budget
        .checked_sub(Duration::from_millis(500))
        .filter(|d| !d.is_zero())
        .unwrap_or(budget)
}

/// Filesystem path named by a `file://` URL; bare paths pass through.
pub(crate) fn path_from_file_url(uri: &str) -> Option<PathBuf> {
    if uri.is_empty() {
        return None;
    }
    if !uri.starts_with("file:") {
        return Some(PathBuf::from(uri));
    }
    Url::parse(uri).ok()?.to_file_path().ok()
}

/// `file://` URL for an absolute `path`.
pub(crate) fn file_url_from_path(path: &Path) -> Result<Url, SourceError> {
    Url::from_file_path(path).map_err(|()| {
        SourceError::Protocol(format!("cannot express {} as a file URL", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcmon_core::types::Severity;

    #[test]
    fn default_sources_cover_every_origin() {
        let sources = default_sources(&MonitorConfig::default());
        let origins: Vec<_> = sources.iter().map(|s| s.origin()).collect();
        assert_eq!(origins, Origin::all().to_vec());
    }

    #[test]
    fn report_counts_records_and_skips() {
        let collection = Collection::ok(vec![DiagnosticRecord::project_level(
            Severity::Error,
            Origin::BuildLog,
            "boom",
        )])
        .with_skipped(2);
        let report = collection.report(Origin::BuildLog);
        assert_eq!(report.record_count, 1);
        assert_eq!(report.skipped_lines, 2);
        assert!(report.status.is_ok());
    }

    #[test]
    fn file_urls_become_paths() {
        assert_eq!(
            path_from_file_url("file:///work/My%20App/a.swift"),
            Some(PathBuf::from("/work/My App/a.swift"))
        );
        assert_eq!(
            path_from_file_url("file:///work/App/Caf%C3%A9%23Sources/a.swift"),
            Some(PathBuf::from("/work/App/Café#Sources/a.swift"))
        );
        assert_eq!(path_from_file_url("/plain/b.swift"), Some(PathBuf::from("/plain/b.swift")));
        assert_eq!(path_from_file_url("file://build-host/a.swift"), None);
        assert_eq!(path_from_file_url(""), None);
    }

    #[test]
    fn paths_become_encoded_file_urls() {
        let url = file_url_from_path(Path::new("/work/My App/Café")).expect("absolute path");
        assert_eq!(url.as_str(), "file:///work/My%20App/Caf%C3%A9");
        assert_eq!(path_from_file_url(url.as_str()), Some(PathBuf::from("/work/My App/Café")));
        assert!(file_url_from_path(Path::new("relative/App")).is_err());
    }

    #[test]
    fn io_timeout_stays_under_budget() {
        let config = MonitorConfig::default();
        assert_eq!(io_timeout(&config), Duration::from_millis(2500));
    }
}
