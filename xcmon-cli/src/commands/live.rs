//! `xcmon live` — Xcode's live issues, read on demand.

use anyhow::Result;
use clap::Args;
use serde_json::Value;

use xcmon_daemon::{LiveDiagnostics, Tool};

use super::diagnostics::print_records;
use super::{call, source_status_label};

#[derive(Args, Debug)]
pub struct LiveArgs {}

impl LiveArgs {
    pub fn run(self) -> Result<()> {
        let live: LiveDiagnostics = call(Tool::GetXcodeLiveDiagnostics, Value::Null)?;
        println!("live diagnostics: {}", source_status_label(&live.status));
        print_records(&live.records, None);
        Ok(())
    }
}
