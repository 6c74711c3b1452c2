//! `xcmon status` — composite project and aggregation status.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use xcmon_daemon::{ProjectStatus, Tool};

use super::{call, display_path, format_datetime_age, format_seconds, print_json, source_status_label};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "source")]
    origin: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "records")]
    records: usize,
    #[tabled(rename = "skipped")]
    skipped: usize,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let status: ProjectStatus = call(Tool::GetProjectStatus, Value::Null)?;
        if self.json {
            return print_json(&status);
        }
        print_status(&status);
        Ok(())
    }
}

fn print_status(status: &ProjectStatus) {
    let project = &status.project;
    let separator = "■".repeat(67).bright_black().to_string();

    println!(
        "xcmon v{} | {}",
        env!("CARGO_PKG_VERSION"),
        project.path.display().to_string().bold()
    );
    println!("{separator}");
    println!(
        "markers:       {} workspaces, {} projects, {} referenced",
        project.workspaces.len(),
        project.projects.len(),
        project.referenced_projects.len()
    );
    if !project.schemes.is_empty() {
        println!("schemes:       {}", project.schemes.join(", "));
    }

    let build_server = if status.build_server.is_valid() {
        "valid".green().to_string()
    } else if !status.build_server.exists {
        "missing".yellow().to_string()
    } else {
        "invalid".red().to_string()
    };
    println!("build server:  {build_server}");

    let reachable = if status.language_server.reachable {
        "reachable".green().to_string()
    } else {
        "unreachable".red().to_string()
    };
    println!(
        "lsp socket:    {} ({})",
        reachable,
        display_path(&status.language_server.socket, Some(project.path.as_path()))
    );

    match &status.build_log {
        Some(log) => println!(
            "build log:     {} ({} old)",
            display_path(&log.path, Some(project.path.as_path())),
            format_seconds(log.age_secs)
        ),
        None => println!("build log:     none"),
    }

    let completed = status
        .completed_at
        .map(format_datetime_age)
        .unwrap_or_else(|| "pending".to_string());
    println!(
        "aggregation:   generation {} | {} passes | {}",
        status.generation, status.passes, completed
    );
    println!("updates:       {} queued", status.recent_updates);
    println!("{separator}");

    if status.sources.is_empty() {
        println!("No aggregation pass has completed yet.");
        return;
    }
    let rows: Vec<SourceRow> = status
        .sources
        .iter()
        .map(|report| SourceRow {
            origin: report.origin.to_string(),
            status: source_status_label(&report.status),
            records: report.record_count,
            skipped: report.skipped_lines,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
