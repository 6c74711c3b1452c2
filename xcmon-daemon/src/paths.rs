use std::path::{Path, PathBuf};
use std::time::Duration;

pub use xcmon_core::config::xcmon_root;

pub const DAEMON_SOCKET: &str = "xcmon.sock";

/// Quiet period after the last `modified` event before it is delivered.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// Upper bound on how long a stream of `modified` events can be held back.
pub const MAX_COALESCE_DELAY: Duration = Duration::from_secs(2);

pub fn socket_path(home: &Path) -> PathBuf {
    xcmon_root(home).join(DAEMON_SOCKET)
}
