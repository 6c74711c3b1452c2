use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use xcmon_core::MonitorError;

use crate::error::{io_err, DaemonError};
use crate::monitor::Monitor;
use crate::paths::socket_path;

/// Operations exposed over the daemon socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    GetProjectPath,
    SetProjectPath,
    GetDiagnostics,
    GetProjectStatus,
    GetBuildServerStatus,
    GetRecentUpdates,
    ClearDiagnosticsQueue,
    GetXcodeLiveDiagnostics,
}

impl Tool {
    pub const ALL: [Tool; 8] = [
        Tool::GetProjectPath,
        Tool::SetProjectPath,
        Tool::GetDiagnostics,
        Tool::GetProjectStatus,
        Tool::GetBuildServerStatus,
        Tool::GetRecentUpdates,
        Tool::ClearDiagnosticsQueue,
        Tool::GetXcodeLiveDiagnostics,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::GetProjectPath => "get_project_path",
            Tool::SetProjectPath => "set_project_path",
            Tool::GetDiagnostics => "get_diagnostics",
            Tool::GetProjectStatus => "get_project_status",
            Tool::GetBuildServerStatus => "get_build_server_status",
            Tool::GetRecentUpdates => "get_recent_updates",
            Tool::ClearDiagnosticsQueue => "clear_diagnostics_queue",
            Tool::GetXcodeLiveDiagnostics => "get_xcode_live_diagnostics",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tool::ALL
            .into_iter()
            .find(|tool| tool.name() == s)
            .ok_or_else(|| format!("unknown tool '{s}'"))
    }
}

/// JSON newline-delimited request. `tool` stays a string so unknown names
/// get a protocol answer rather than a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

impl ToolRequest {
    pub fn new(tool: Tool, args: Value) -> Self {
        Self {
            tool: tool.name().to_string(),
            args,
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Answer one request against `monitor`.
pub async fn dispatch(monitor: &Monitor, request: &ToolRequest) -> DaemonResponse {
    let tool = match request.tool.parse::<Tool>() {
        Ok(tool) => tool,
        Err(message) => return DaemonResponse::error(message),
    };
    match call(monitor, tool, &request.args).await {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => {
            tracing::debug!(tool = %tool, error = %err, "tool call failed");
            DaemonResponse::error(err.to_string())
        }
    }
}

async fn call(monitor: &Monitor, tool: Tool, args: &Value) -> Result<Value, DaemonError> {
    let data = match tool {
        Tool::GetProjectPath => json!({ "path": monitor.get_project_path()? }),
        Tool::SetProjectPath => {
            let path = args.get("path").and_then(Value::as_str).ok_or_else(|| {
                MonitorError::InvalidArgument(
                    "set_project_path requires a string `path` argument".to_string(),
                )
            })?;
            let project = monitor.set_project_path(Path::new(path)).await?;
            serde_json::to_value(project.as_ref())?
        }
        Tool::GetDiagnostics => serde_json::to_value(monitor.get_diagnostics().await.as_ref())?,
        Tool::GetProjectStatus => serde_json::to_value(monitor.get_project_status().await?)?,
        Tool::GetBuildServerStatus => serde_json::to_value(monitor.get_build_server_status().await?)?,
        Tool::GetRecentUpdates => json!({ "updates": monitor.get_recent_updates().await }),
        Tool::ClearDiagnosticsQueue => json!({ "cleared": monitor.clear_diagnostics_queue().await }),
        Tool::GetXcodeLiveDiagnostics => {
            serde_json::to_value(monitor.get_xcode_live_diagnostics().await?)?
        }
    };
    Ok(data)
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &ToolRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Invoke `tool` on the daemon under `home` and return its payload.
pub fn call_tool(home: &Path, tool: Tool, args: Value) -> Result<Value, DaemonError> {
    let response = send_request(home, &ToolRequest::new(tool, args))?;
    response_into_data(response)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_names_round_trip() {
        for tool in Tool::ALL {
            assert_eq!(tool.name().parse::<Tool>(), Ok(tool));
            assert_eq!(serde_json::to_value(tool).expect("serialize"), json!(tool.name()));
        }
        assert!("stop".parse::<Tool>().is_err());
    }

    #[test]
    fn request_without_args_parses() {
        let request: ToolRequest =
            serde_json::from_str(r#"{"tool":"get_diagnostics"}"#).expect("request");
        assert_eq!(request.tool, "get_diagnostics");
        assert!(request.args.is_null());
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = response_into_data(DaemonResponse::error("no project configured")).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(ref m) if m == "no project configured"));
    }

    #[test]
    fn missing_socket_means_not_running() {
        let home = tempfile::TempDir::new().expect("home");
        let err = call_tool(home.path(), Tool::GetProjectPath, Value::Null).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }
}
