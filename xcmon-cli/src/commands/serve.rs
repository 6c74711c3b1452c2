//! `xcmon serve` — run the daemon in the foreground.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use xcmon_daemon::start_blocking;

use super::{absolute, home};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Project root to monitor at startup (overrides `default_root`).
    #[arg(long)]
    pub path: Option<PathBuf>,
}

impl ServeArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let initial_root = self.path.as_deref().map(absolute).transpose()?;
        start_blocking(&home, initial_root).context("daemon exited with error")
    }
}
