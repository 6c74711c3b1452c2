//! Known artifact locations under a monitored root.
//!
//! ```text
//! <root>/
//!   buildServer.json      (build-server connection file)
//!   .build/logs/*.log     (SwiftPM build logs)
//!   .xcmon/logs/*         (captured xcodebuild output, xclogparser reports)
//!   .xcmon/lsp.sock       (language-server bridge socket)
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use xcmon_core::{types::ArtifactPaths, MonitorConfig};

pub const BUILD_SERVER_CONFIG: &str = "buildServer.json";

/// Extensions recognised as build-log artifacts.
const BUILD_LOG_EXTENSIONS: &[&str] = &["log", "txt", "json"];

/// Config-derived overrides for artifact discovery.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolverOptions {
    pub build_log_dirs: Vec<PathBuf>,
    pub live_diagnostics_dir: Option<PathBuf>,
    pub language_server_socket: Option<PathBuf>,
}

impl ResolverOptions {
    pub fn from_config(config: &MonitorConfig, home: &Path) -> Self {
        Self {
            build_log_dirs: config.build_log_dirs.clone(),
            live_diagnostics_dir: Some(config.live_diagnostics_dir_at(home)),
            language_server_socket: config.language_server_socket.clone(),
        }
    }
}

/// The most recently modified build-log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLogArtifact {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Artifact paths for `root`. Pure, no I/O: paths may not exist yet.
pub fn artifact_paths(root: &Path, options: &ResolverOptions) -> ArtifactPaths {
    let mut build_log_dirs = vec![
        root.join(".build").join("logs"),
        root.join(".xcmon").join("logs"),
    ];
    for dir in &options.build_log_dirs {
        if !build_log_dirs.contains(dir) {
            build_log_dirs.push(dir.clone());
        }
    }

    ArtifactPaths {
        build_server_config: root.join(BUILD_SERVER_CONFIG),
        build_log_dirs,
        live_diagnostics_dir: options.live_diagnostics_dir.clone(),
        language_server_socket: options
            .language_server_socket
            .clone()
            .unwrap_or_else(|| root.join(".xcmon").join("lsp.sock")),
    }
}

/// Newest build-log file across `dirs` (non-recursive). Missing directories
/// are skipped; ties keep the first directory's file.
pub fn most_recent_build_log(dirs: &[PathBuf]) -> Option<BuildLogArtifact> {
    let mut newest: Option<BuildLogArtifact> = None;
    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !is_build_log(&path) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Ok(modified) = meta.modified() else {
                continue;
            };
            let newer = newest
                .as_ref()
                .map(|current| modified > current.modified)
                .unwrap_or(true);
            if newer {
                newest = Some(BuildLogArtifact { path, modified });
            }
        }
    }
    newest
}

/// Scheme named by a `buildServer.json`: the `scheme` key, or the value after
/// `-scheme` in its `arguments`/`argv` arrays.
pub fn scheme_from_build_server(config_path: &Path) -> Option<String> {
    let content = fs::read_to_string(config_path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&content).ok()?;
    scheme_from_value(&value)
}

pub fn scheme_from_value(value: &serde_json::Value) -> Option<String> {
    if let Some(scheme) = value.get("scheme").and_then(|v| v.as_str()) {
        return Some(scheme.to_string());
    }
    for key in ["arguments", "argv"] {
        let Some(args) = value.get(key).and_then(|v| v.as_array()) else {
            continue;
        };
        let mut iter = args.iter().filter_map(|a| a.as_str());
        while let Some(arg) = iter.next() {
            if arg == "-scheme" {
                if let Some(scheme) = iter.next() {
                    return Some(scheme.to_string());
                }
            }
        }
    }
    None
}

fn is_build_log(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| BUILD_LOG_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_socket_lives_under_root() {
        let paths = artifact_paths(Path::new("/work/App"), &ResolverOptions::default());
        assert_eq!(paths.language_server_socket, PathBuf::from("/work/App/.xcmon/lsp.sock"));
        assert_eq!(paths.build_server_config, PathBuf::from("/work/App/buildServer.json"));
        assert_eq!(paths.build_log_dirs.len(), 2);
    }

    #[test]
    fn extra_log_dirs_are_appended_once() {
        let options = ResolverOptions {
            build_log_dirs: vec![PathBuf::from("/logs"), PathBuf::from("/work/App/.build/logs")],
            ..ResolverOptions::default()
        };
        let paths = artifact_paths(Path::new("/work/App"), &options);
        assert_eq!(
            paths.build_log_dirs,
            vec![
                PathBuf::from("/work/App/.build/logs"),
                PathBuf::from("/work/App/.xcmon/logs"),
                PathBuf::from("/logs"),
            ]
        );
    }

    #[test]
    fn scheme_key_wins_over_arguments() {
        let value = json!({"scheme": "App", "arguments": ["-scheme", "Other"]});
        assert_eq!(scheme_from_value(&value).as_deref(), Some("App"));
    }

    #[test]
    fn scheme_from_argv_pair() {
        let value = json!({"argv": ["xcode-build-server", "-scheme", "AppTests"]});
        assert_eq!(scheme_from_value(&value).as_deref(), Some("AppTests"));
        let dangling = json!({"argv": ["-scheme"]});
        assert_eq!(scheme_from_value(&dangling), None);
    }
}
