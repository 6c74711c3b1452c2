//! Error types for xcmon-core.

use std::path::PathBuf;

use thiserror::Error;

/// Hard failures surfaced to the protocol layer.
///
/// Source-level problems never appear here; they travel as
/// [`SourceStatus`](crate::types::SourceStatus) flags inside responses.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The requested monitored root does not exist or is not a directory.
    #[error("invalid project root {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    /// A query arrived before any project path was set.
    #[error("no project configured; call set_project_path first")]
    NoProjectConfigured,

    /// A structurally invalid request argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors from loading `~/.xcmon/config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with the file path.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config value `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
