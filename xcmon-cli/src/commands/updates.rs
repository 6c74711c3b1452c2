//! `xcmon updates` — recent triggering file changes.

use anyhow::Result;
use clap::Args;
use serde::Deserialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use xcmon_core::types::UpdateQueueEntry;
use xcmon_daemon::Tool;

use super::{call, format_datetime_age};

#[derive(Args, Debug)]
pub struct UpdatesArgs {
    /// Empty the queue instead of listing it. Diagnostics are kept.
    #[arg(long)]
    pub clear: bool,
}

#[derive(Deserialize)]
struct Updates {
    updates: Vec<UpdateQueueEntry>,
}

#[derive(Deserialize)]
struct Cleared {
    cleared: usize,
}

#[derive(Tabled)]
struct UpdateRow {
    #[tabled(rename = "when")]
    when: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "source")]
    origin: String,
    #[tabled(rename = "path")]
    path: String,
}

impl UpdatesArgs {
    pub fn run(self) -> Result<()> {
        if self.clear {
            let cleared: Cleared = call(Tool::ClearDiagnosticsQueue, Value::Null)?;
            println!("cleared {} queued updates", cleared.cleared);
            return Ok(());
        }

        let Updates { updates } = call(Tool::GetRecentUpdates, Value::Null)?;
        if updates.is_empty() {
            println!("No recent updates.");
            return Ok(());
        }

        // Newest first for reading.
        let rows: Vec<UpdateRow> = updates
            .into_iter()
            .rev()
            .map(|entry| UpdateRow {
                when: format_datetime_age(entry.at),
                kind: entry.kind.to_string(),
                origin: entry
                    .origin
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                path: entry.path.display().to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
