//! xcmon — IDE project diagnostics monitor.
//!
//! # Usage
//!
//! ```text
//! xcmon serve [--path <root>]
//! xcmon path [--set <root>]
//! xcmon diagnostics [--json]
//! xcmon status [--json]
//! xcmon updates [--clear]
//! xcmon live
//! xcmon build-server
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    build_server::BuildServerArgs, diagnostics::DiagnosticsArgs, live::LiveArgs, path::PathArgs,
    serve::ServeArgs, status::StatusArgs, updates::UpdatesArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "xcmon",
    version,
    about = "Watch an IDE project tree and serve its aggregated diagnostics",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the monitor daemon in the foreground.
    Serve(ServeArgs),

    /// Show or change the monitored project root.
    Path(PathArgs),

    /// Print the latest aggregated diagnostics.
    Diagnostics(DiagnosticsArgs),

    /// Show project, build server, language server and aggregation status.
    Status(StatusArgs),

    /// List or clear recent triggering file changes.
    Updates(UpdatesArgs),

    /// Read Xcode's live issue documents now.
    Live(LiveArgs),

    /// Validate the project's buildServer.json.
    BuildServer(BuildServerArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => args.run(),
        Commands::Path(args) => args.run(),
        Commands::Diagnostics(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Updates(args) => args.run(),
        Commands::Live(args) => args.run(),
        Commands::BuildServer(args) => args.run(),
    }
}
