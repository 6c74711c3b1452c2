//! Monitor configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.xcmon/
//!   config.yaml     (optional; every key has a default)
//! ```
//!
//! # API pattern
//!
//! - `load_at(home)` — explicit home; used in tests with `TempDir`
//! - `load()` — derives home from `dirs::home_dir()`, delegates to `load_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "config.yaml";

/// Source file extensions watched when the config does not override them.
pub const DEFAULT_EXTENSIONS: &[&str] = &["swift", "m", "h", "mm", "c", "cpp", "log", "json"];

/// Loaded configuration. Missing keys take the documented defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Root monitored at startup when no explicit path is given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_root: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub adapter_timeout_secs: u64,
    pub debounce_ms: u64,
    pub recent_updates_capacity: usize,
    pub extensions: Vec<String>,
    /// Searched for build logs in addition to the per-root defaults.
    pub build_log_dirs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_diagnostics_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_server_socket: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            default_root: None,
            poll_interval_secs: 5,
            adapter_timeout_secs: 3,
            debounce_ms: 300,
            recent_updates_capacity: 100,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            build_log_dirs: Vec::new(),
            live_diagnostics_dir: None,
            language_server_socket: None,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Xcode's live issue directory; explicit config wins over the home default.
    pub fn live_diagnostics_dir_at(&self, home: &Path) -> PathBuf {
        self.live_diagnostics_dir.clone().unwrap_or_else(|| {
            home.join("Library")
                .join("Developer")
                .join("Xcode")
                .join("UserData")
                .join("IDEEditorInteractivityHistory")
        })
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "poll_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.adapter_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "adapter_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.recent_updates_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "recent_updates_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}

/// `<home>/.xcmon/` — pure, no I/O.
pub fn xcmon_root(home: &Path) -> PathBuf {
    home.join(".xcmon")
}

/// `<home>/.xcmon/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    xcmon_root(home).join(CONFIG_FILE)
}

/// Load config from `<home>/.xcmon/config.yaml`, falling back to defaults
/// when the file does not exist.
pub fn load_at(home: &Path) -> Result<MonitorConfig, ConfigError> {
    let path = config_path_at(home);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(MonitorConfig::default());
        }
        Err(source) => return Err(ConfigError::Io { path, source }),
    };
    if content.trim().is_empty() {
        return Ok(MonitorConfig::default());
    }
    let config: MonitorConfig =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
    config.validate()
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<MonitorConfig, ConfigError> {
    load_at(&home()?)
}

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(home: &TempDir, yaml: &str) {
        let dir = xcmon_root(home.path());
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(CONFIG_FILE), yaml).expect("write config");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().expect("home");
        let config = load_at(home.path()).expect("load");
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.recent_updates_capacity, 100);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let home = TempDir::new().expect("home");
        write_config(&home, "default_root: /work/App\npoll_interval_secs: 10\n");
        let config = load_at(home.path()).expect("load");
        assert_eq!(config.default_root, Some(PathBuf::from("/work/App")));
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.adapter_timeout_secs, 3);
        assert!(config.extensions.iter().any(|e| e == "swift"));
    }

    #[test]
    fn malformed_yaml_reports_path() {
        let home = TempDir::new().expect("home");
        write_config(&home, "poll_interval_secs: [unclosed");
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let home = TempDir::new().expect("home");
        write_config(&home, "recent_updates_capacity: 0\n");
        let err = load_at(home.path()).unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { key: "recent_updates_capacity", .. }),
            "got: {err}"
        );
    }

    #[test]
    fn live_dir_defaults_under_home() {
        let config = MonitorConfig::default();
        let dir = config.live_diagnostics_dir_at(Path::new("/Users/dev"));
        assert!(dir.ends_with("UserData/IDEEditorInteractivityHistory"));
        assert!(dir.starts_with("/Users/dev/Library"));
    }
}
