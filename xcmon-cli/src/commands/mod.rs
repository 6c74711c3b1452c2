pub mod build_server;
pub mod diagnostics;
pub mod live;
pub mod path;
pub mod serve;
pub mod status;
pub mod updates;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use xcmon_core::types::{Severity, SourceStatus};
use xcmon_daemon::{call_tool, DaemonError, Tool};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Call `tool` on the running daemon and decode its payload.
pub(crate) fn call<T: DeserializeOwned>(tool: Tool, args: Value) -> Result<T> {
    let home = home()?;
    let data = match call_tool(&home, tool, args) {
        Ok(data) => data,
        Err(DaemonError::DaemonNotRunning { socket }) => bail!(
            "daemon is not running (no socket at {}); start it with `xcmon serve`",
            socket.display()
        ),
        Err(err) => return Err(err).with_context(|| format!("{tool} failed")),
    };
    serde_json::from_value(data).with_context(|| format!("unexpected {tool} payload"))
}

pub(crate) fn print_json(value: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON")?
    );
    Ok(())
}

/// Absolute form of a user-supplied path; the daemon's cwd is not ours.
pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    Ok(cwd.join(path))
}

/// `path` relative to `root` when it lies below it.
pub(crate) fn display_path(path: &Path, root: Option<&Path>) -> String {
    root.and_then(|root| path.strip_prefix(root).ok())
        .unwrap_or(path)
        .display()
        .to_string()
}

pub(crate) fn severity_label(severity: Severity) -> String {
    match severity {
        Severity::Error => "error".red().bold().to_string(),
        Severity::Warning => "warning".yellow().bold().to_string(),
        Severity::Note => "note".cyan().to_string(),
    }
}

pub(crate) fn source_status_label(status: &SourceStatus) -> String {
    match status {
        SourceStatus::Ok => "ok".green().to_string(),
        SourceStatus::Degraded { reason } => format!("{} ({reason})", "degraded".yellow()),
        SourceStatus::Unavailable { reason } => format!("{} ({reason})", "unavailable".red()),
    }
}

pub(crate) fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

pub(crate) fn format_datetime_age(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    let age = chrono::Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0) as u64;
    format!("{} ago", format_seconds(age))
}
