//! xcmon core library — domain types, configuration, errors.
//!
//! - [`types`] — diagnostics, snapshots, change events, project model
//! - [`error`] — [`MonitorError`], [`ConfigError`]
//! - [`config`] — `~/.xcmon/config.yaml` loading

pub mod config;
pub mod error;
pub mod types;

pub use config::MonitorConfig;
pub use error::{ConfigError, MonitorError};
pub use types::{
    ArtifactPaths, BuildServerStatus, ChangeEvent, ChangeKind, DiagnosticRecord,
    DiagnosticsSnapshot, MonitoredProject, Origin, Severity, SourceReport, SourceStatus,
    UpdateQueueEntry,
};
