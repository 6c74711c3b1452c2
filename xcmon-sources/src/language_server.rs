//! Language-server adapter.
//!
//! Opens the project's LSP socket, runs one short session
//! (`initialize`, `initialized`, `workspace/diagnostic`, `shutdown`, `exit`)
//! and folds in any `textDocument/publishDiagnostics` notifications that
//! arrive while waiting for responses. The whole session shares one
//! deadline of `io_timeout`.

use std::collections::BTreeMap;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};

use xcmon_core::types::{DiagnosticRecord, MonitoredProject, Origin, Severity};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::{io_err, SourceError};
use crate::{file_url_from_path, path_from_file_url, Collection, DiagnosticSource};

const INITIALIZE_ID: u64 = 1;
const DIAGNOSTIC_ID: u64 = 2;
const SHUTDOWN_ID: u64 = 3;

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i64 = -32601;

pub struct LanguageServerSource {
    io_timeout: Duration,
}

impl LanguageServerSource {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }
}

impl DiagnosticSource for LanguageServerSource {
    fn origin(&self) -> Origin {
        Origin::LanguageServer
    }

    fn collect(&self, project: &MonitoredProject) -> Collection {
        let socket = &project.artifacts.language_server_socket;
        if !socket.exists() {
            return Collection::unavailable(format!(
                "language server socket {} not found",
                socket.display()
            ));
        }
        match query_diagnostics(socket, &project.path, self.io_timeout) {
            Ok(records) => Collection::ok(records),
            Err(err) => Collection::unavailable(err.to_string()),
        }
    }
}

/// True when something accepts connections on `socket`.
pub fn probe_language_server(socket: &Path) -> bool {
    UnixStream::connect(socket).is_ok()
}

/// Run one diagnostics session against the server listening on `socket`.
pub fn query_diagnostics(
    socket: &Path,
    root: &Path,
    io_timeout: Duration,
) -> Result<Vec<DiagnosticRecord>, SourceError> {
    let deadline = Instant::now() + io_timeout;
    let root_uri = file_url_from_path(root)?;
    let stream = UnixStream::connect(socket).map_err(|e| io_err(socket, e))?;
    stream
        .set_read_timeout(Some(io_timeout))
        .and_then(|()| stream.set_write_timeout(Some(io_timeout)))
        .map_err(|e| io_err(socket, e))?;
    let write_half = stream.try_clone().map_err(|e| io_err(socket, e))?;
    let control = stream.try_clone().map_err(|e| io_err(socket, e))?;

    let mut session = Session {
        reader: FrameReader::new(stream),
        writer: FrameWriter::new(write_half),
        control,
        deadline,
        documents: BTreeMap::new(),
    };

    session.request(
        INITIALIZE_ID,
        "initialize",
        json!({
            "processId": std::process::id(),
            "rootUri": root_uri.as_str(),
            "capabilities": {
                "textDocument": { "publishDiagnostics": { "relatedInformation": false } },
                "workspace": { "diagnostics": { "refreshSupport": false } }
            }
        }),
    )?;
    session.notify("initialized", json!({}))?;

    match session.request(DIAGNOSTIC_ID, "workspace/diagnostic", json!({ "previousResultIds": [] })) {
        Ok(report) => session.fold_workspace_report(&report),
        Err(SourceError::Rpc { code: METHOD_NOT_FOUND, .. }) => {
            tracing::debug!("language server lacks workspace/diagnostic, using published diagnostics");
        }
        Err(err) => return Err(err),
    }

    // The server may already be gone once it has answered; the records stand.
    if session.request(SHUTDOWN_ID, "shutdown", Value::Null).is_ok() {
        let _ = session.notify("exit", Value::Null);
    }

    Ok(session.into_records())
}

struct Session {
    reader: FrameReader<UnixStream>,
    writer: FrameWriter<UnixStream>,
    /// Shares the socket with `reader`; used to shrink the read timeout.
    control: UnixStream,
    deadline: Instant,
    /// Latest diagnostics per document URI.
    documents: BTreeMap<String, Vec<Value>>,
}

impl Session {
    fn notify(&mut self, method: &str, params: Value) -> Result<(), SourceError> {
        self.writer
            .write_frame(&json!({ "jsonrpc": "2.0", "method": method, "params": params }))
    }

    /// Send a request and wait for its response, handling anything the
    /// server sends in between.
    fn request(&mut self, id: u64, method: &str, params: Value) -> Result<Value, SourceError> {
        self.writer.write_frame(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))?;

        loop {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SourceError::Protocol(format!(
                    "deadline exceeded waiting for {method}"
                )));
            }
            self.control
                .set_read_timeout(Some(remaining))
                .map_err(|e| io_err("language server socket", e))?;
            let Some(frame) = self.reader.read_frame()? else {
                return Err(SourceError::Protocol(format!(
                    "server closed the connection before answering {method}"
                )));
            };

            match frame.get("method").and_then(Value::as_str) {
                Some("textDocument/publishDiagnostics") => {
                    self.fold_published(&frame["params"]);
                    continue;
                }
                Some(other) => {
                    // Server-to-client requests expect an answer; null is accepted
                    // for progress and configuration requests alike.
                    if let Some(request_id) = frame.get("id") {
                        tracing::debug!(method = other, "answering server request");
                        self.writer.write_frame(&json!({
                            "jsonrpc": "2.0",
                            "id": request_id,
                            "result": Value::Null,
                        }))?;
                    }
                    continue;
                }
                None => {}
            }

            if frame.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = frame.get("error") {
                let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(SourceError::Rpc {
                    method: method.to_string(),
                    code,
                    message: message.to_string(),
                });
            }
            return Ok(frame.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    fn fold_published(&mut self, params: &Value) {
        let Some(uri) = params.get("uri").and_then(Value::as_str) else {
            return;
        };
        let diagnostics = params
            .get("diagnostics")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        self.documents.insert(uri.to_string(), diagnostics);
    }

    fn fold_workspace_report(&mut self, report: &Value) {
        let Some(items) = report.get("items").and_then(Value::as_array) else {
            return;
        };
        for item in items {
            // "unchanged" reports carry no items and keep what we have.
            if item.get("kind").and_then(Value::as_str) == Some("unchanged") {
                continue;
            }
            let Some(uri) = item.get("uri").and_then(Value::as_str) else {
                continue;
            };
            let diagnostics = item
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            self.documents.insert(uri.to_string(), diagnostics);
        }
    }

    fn into_records(self) -> Vec<DiagnosticRecord> {
        let detected_at = Utc::now();
        let mut records = Vec::new();
        for (uri, diagnostics) in self.documents {
            let file = path_from_file_url(&uri);
            for diagnostic in diagnostics {
                if let Some(record) = lsp_record(&diagnostic, file.clone()) {
                    records.push(DiagnosticRecord { detected_at, ..record });
                }
            }
        }
        records
    }
}

/// Convert one LSP `Diagnostic`; positions become 1-based.
fn lsp_record(diagnostic: &Value, file: Option<std::path::PathBuf>) -> Option<DiagnosticRecord> {
    let message = diagnostic.get("message").and_then(Value::as_str)?;
    let severity = match diagnostic.get("severity").and_then(Value::as_u64) {
        Some(2) => Severity::Warning,
        Some(3) | Some(4) => Severity::Note,
        _ => Severity::Error,
    };
    let start = &diagnostic["range"]["start"];
    let line = start
        .get("line")
        .and_then(Value::as_u64)
        .and_then(|l| u32::try_from(l + 1).ok());
    let column = start
        .get("character")
        .and_then(Value::as_u64)
        .and_then(|c| u32::try_from(c + 1).ok());

    let record = DiagnosticRecord::project_level(severity, Origin::LanguageServer, message);
    Some(match file {
        Some(file) => record.at_location(file, line, column),
        None => record,
    })
}
