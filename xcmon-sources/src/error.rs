//! Error types for xcmon-sources.
//!
//! These never leave an adapter: [`crate::DiagnosticSource::collect`] folds
//! every `SourceError` into a `SourceStatus` before returning.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid property list {path}: {source}")]
    Plist {
        path: PathBuf,
        #[source]
        source: plist::Error,
    },

    /// Malformed `Content-Length` framing on the language-server socket.
    #[error("frame error: {0}")]
    Frame(String),

    /// The peer closed mid-exchange or the session ran out of time.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered a request with a JSON-RPC error object.
    #[error("{method} failed ({code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
}

/// Convenience constructor for [`SourceError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SourceError {
    SourceError::Io {
        path: path.into(),
        source,
    }
}
