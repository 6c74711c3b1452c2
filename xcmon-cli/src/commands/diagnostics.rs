//! `xcmon diagnostics` — the latest published snapshot.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use xcmon_core::types::{DiagnosticRecord, DiagnosticsSnapshot, Severity};
use xcmon_daemon::Tool;

use super::{call, display_path, format_datetime_age, print_json, severity_label};

#[derive(Args, Debug)]
pub struct DiagnosticsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "severity")]
    severity: String,
    #[tabled(rename = "location")]
    location: String,
    #[tabled(rename = "origin")]
    origin: String,
    #[tabled(rename = "message")]
    message: String,
}

impl DiagnosticsArgs {
    pub fn run(self) -> Result<()> {
        let snapshot: DiagnosticsSnapshot = call(Tool::GetDiagnostics, Value::Null)?;
        if self.json {
            return print_json(&snapshot);
        }

        let completed = snapshot
            .completed_at
            .map(format_datetime_age)
            .unwrap_or_else(|| "pending".to_string());
        println!(
            "generation {} | {} errors | {} warnings | {} notes | {}",
            snapshot.generation,
            snapshot.count(Severity::Error),
            snapshot.count(Severity::Warning),
            snapshot.count(Severity::Note),
            completed,
        );
        print_records(&snapshot.records, snapshot.project_root.as_deref());
        Ok(())
    }
}

/// Table of records, paths shown relative to `root`.
pub(crate) fn print_records(records: &[DiagnosticRecord], root: Option<&Path>) {
    if records.is_empty() {
        println!("No diagnostics.");
        return;
    }

    let rows: Vec<RecordRow> = records
        .iter()
        .map(|record| RecordRow {
            severity: severity_label(record.severity),
            location: location(record, root),
            origin: record.origin.to_string(),
            message: record.message.clone(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn location(record: &DiagnosticRecord, root: Option<&Path>) -> String {
    let Some(file) = record.file.as_deref() else {
        return "-".to_string();
    };
    let mut location = display_path(file, root);
    if let Some(line) = record.line {
        location.push_str(&format!(":{line}"));
        if let Some(column) = record.column {
            location.push_str(&format!(":{column}"));
        }
    }
    location
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcmon_core::types::Origin;

    #[test]
    fn location_includes_line_and_column() {
        let record = DiagnosticRecord::project_level(Severity::Error, Origin::BuildLog, "boom")
            .at_location("/work/App/Sources/main.swift", Some(12), Some(5));
        assert_eq!(
            location(&record, Some(Path::new("/work/App"))),
            "Sources/main.swift:12:5"
        );

        let project_level =
            DiagnosticRecord::project_level(Severity::Warning, Origin::BuildServerConfig, "x");
        assert_eq!(location(&project_level, None), "-");
    }
}
