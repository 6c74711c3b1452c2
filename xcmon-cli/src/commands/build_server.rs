//! `xcmon build-server` — buildServer.json validity.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use xcmon_core::types::BuildServerStatus;
use xcmon_daemon::Tool;

use super::call;

#[derive(Args, Debug)]
pub struct BuildServerArgs {}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "field")]
    field: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

impl BuildServerArgs {
    pub fn run(self) -> Result<()> {
        let status: BuildServerStatus = call(Tool::GetBuildServerStatus, Value::Null)?;

        let verdict = if status.is_valid() {
            "valid".green().bold()
        } else {
            "invalid".red().bold()
        };
        println!("{} {}", status.config_path.display(), verdict);

        let mut table = Table::new(rows(&status));
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn rows(status: &BuildServerStatus) -> Vec<FieldRow> {
    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    let missing = if status.missing_keys.is_empty() {
        "-".to_string()
    } else {
        status.missing_keys.join(", ")
    };
    let workspace = status.workspace.as_ref().map(|path| {
        match status.workspace_exists {
            Some(false) => format!("{} (not found)", path.display()),
            _ => path.display().to_string(),
        }
    });

    vec![
        FieldRow { field: "exists", value: status.exists.to_string() },
        FieldRow { field: "parses", value: status.parses.to_string() },
        FieldRow { field: "missing keys", value: missing },
        FieldRow { field: "name", value: or_dash(status.name.clone()) },
        FieldRow { field: "scheme", value: or_dash(status.scheme.clone()) },
        FieldRow { field: "workspace", value: or_dash(workspace) },
        FieldRow {
            field: "build root",
            value: or_dash(status.build_root.as_ref().map(|p| p.display().to_string())),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn dangling_workspace_is_flagged() {
        let mut status = BuildServerStatus::missing(PathBuf::from("/work/App/buildServer.json"));
        status.exists = true;
        status.parses = true;
        status.workspace = Some(PathBuf::from("/work/App/App.xcworkspace"));
        status.workspace_exists = Some(false);

        let rows = rows(&status);
        let workspace = rows.iter().find(|r| r.field == "workspace").expect("workspace row");
        assert_eq!(workspace.value, "/work/App/App.xcworkspace (not found)");
        let missing = rows.iter().find(|r| r.field == "missing keys").expect("missing row");
        assert_eq!(missing.value, "-");
    }
}
