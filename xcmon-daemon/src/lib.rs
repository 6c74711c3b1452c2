//! xcmon daemon: watcher, aggregator, monitor core and socket runtime.

pub mod aggregator;
mod error;
pub mod monitor;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod watcher;

pub use aggregator::{ActiveProject, Aggregator, Trigger, TriggerOutcome, UpdateQueue};
pub use error::DaemonError;
pub use monitor::{BuildLogInfo, LanguageServerStatus, LiveDiagnostics, Monitor, ProjectStatus};
pub use protocol::{call_tool, dispatch, send_request, DaemonResponse, Tool, ToolRequest};
pub use runtime::{run, start_blocking};
pub use watcher::{watch, ChangeStream, WatchOptions};
