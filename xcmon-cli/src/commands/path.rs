//! `xcmon path` — show or switch the monitored root.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use serde_json::{json, Value};

use xcmon_core::types::MonitoredProject;
use xcmon_daemon::Tool;

use super::{absolute, call};

#[derive(Args, Debug)]
pub struct PathArgs {
    /// Switch monitoring to this root.
    #[arg(long)]
    pub set: Option<PathBuf>,
}

#[derive(Deserialize)]
struct ProjectPath {
    path: PathBuf,
}

impl PathArgs {
    pub fn run(self) -> Result<()> {
        let Some(root) = self.set else {
            let current: ProjectPath = call(Tool::GetProjectPath, Value::Null)?;
            println!("{}", current.path.display());
            return Ok(());
        };

        let root = absolute(&root)?;
        let project: MonitoredProject = call(
            Tool::SetProjectPath,
            json!({ "path": root.display().to_string() }),
        )?;
        println!("{} {}", "monitoring".green().bold(), project.path.display());
        println!(
            "  {} workspaces, {} projects, {} schemes",
            project.workspaces.len(),
            project.projects.len(),
            project.schemes.len()
        );
        Ok(())
    }
}
