//! Build-server config adapter.
//!
//! Validates the BSP connection file (`buildServer.json`) at the project
//! root. Problems become project-level records; the derived
//! [`BuildServerStatus`] is recomputed on every call.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use xcmon_core::types::{BuildServerStatus, DiagnosticRecord, MonitoredProject, Origin, Severity};
use xcmon_resolver::scheme_from_value;

use crate::{Collection, DiagnosticSource};

/// Keys every BSP connection file must carry.
pub const REQUIRED_KEYS: &[&str] = &["name", "version", "bspVersion", "languages", "argv"];

pub struct BuildServerSource;

impl DiagnosticSource for BuildServerSource {
    fn origin(&self) -> Origin {
        Origin::BuildServerConfig
    }

    fn collect(&self, project: &MonitoredProject) -> Collection {
        let (_, records) = inspect_build_server(&project.artifacts.build_server_config);
        Collection::ok(records)
    }
}

/// Status of the config at `config_path` plus records describing its problems.
pub fn inspect_build_server(config_path: &Path) -> (BuildServerStatus, Vec<DiagnosticRecord>) {
    let mut status = BuildServerStatus::missing(config_path.to_path_buf());
    let problem = |severity, message: String| {
        DiagnosticRecord::project_level(severity, Origin::BuildServerConfig, message)
    };

    let content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            let record = problem(
                Severity::Warning,
                format!("{} not found; build server integration is off", config_path.display()),
            );
            return (status, vec![record]);
        }
        Err(err) => {
            status.exists = true;
            let record = problem(
                Severity::Error,
                format!("cannot read {}: {err}", config_path.display()),
            );
            return (status, vec![record]);
        }
    };
    status.exists = true;

    let value: Value = match serde_json::from_str(&content) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            let record = problem(
                Severity::Error,
                format!("{} is not a JSON object", config_path.display()),
            );
            return (status, vec![record]);
        }
        Err(err) => {
            let record = problem(
                Severity::Error,
                format!("{} does not parse: {err}", config_path.display()),
            );
            return (status, vec![record]);
        }
    };
    status.parses = true;

    status.missing_keys = REQUIRED_KEYS
        .iter()
        .filter(|key| value.get(**key).map(Value::is_null).unwrap_or(true))
        .map(|key| key.to_string())
        .collect();
    status.name = value.get("name").and_then(Value::as_str).map(str::to_string);
    status.scheme = scheme_from_value(&value);
    status.build_root = value
        .get("build_root")
        .and_then(Value::as_str)
        .map(PathBuf::from);
    status.workspace = value.get("workspace").and_then(Value::as_str).map(|raw| {
        let path = PathBuf::from(raw);
        match config_path.parent() {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        }
    });
    status.workspace_exists = status.workspace.as_deref().map(Path::exists);

    let mut records = Vec::new();
    if !status.missing_keys.is_empty() {
        records.push(problem(
            Severity::Error,
            format!(
                "{} is missing required keys: {}",
                config_path.display(),
                status.missing_keys.join(", ")
            ),
        ));
    }
    if let (Some(workspace), Some(false)) = (&status.workspace, status.workspace_exists) {
        records.push(problem(
            Severity::Warning,
            format!("workspace {} named by buildServer.json does not exist", workspace.display()),
        ));
    }
    (status, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("buildServer.json");
        fs::write(&path, body).expect("write config");
        path
    }

    #[test]
    fn complete_config_is_valid() {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir(dir.path().join("App.xcworkspace")).expect("workspace");
        let path = write_config(
            &dir,
            r#"{
                "name": "xcode build server",
                "version": "0.2",
                "bspVersion": "2.0",
                "languages": ["swift", "objective-c"],
                "argv": ["/usr/local/bin/xcode-build-server"],
                "workspace": "App.xcworkspace",
                "build_root": "/tmp/DerivedData/App",
                "scheme": "App"
            }"#,
        );

        let (status, records) = inspect_build_server(&path);
        assert!(status.is_valid(), "status: {status:?}");
        assert!(records.is_empty());
        assert_eq!(status.name.as_deref(), Some("xcode build server"));
        assert_eq!(status.scheme.as_deref(), Some("App"));
        assert_eq!(status.workspace, Some(dir.path().join("App.xcworkspace")));
        assert_eq!(status.workspace_exists, Some(true));
        assert_eq!(status.build_root, Some(PathBuf::from("/tmp/DerivedData/App")));
    }

    #[test]
    fn missing_file_is_a_warning() {
        let dir = TempDir::new().expect("tempdir");
        let (status, records) = inspect_build_server(&dir.path().join("buildServer.json"));
        assert!(!status.exists);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Warning);
        assert_eq!(records[0].file, None);
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(&dir, "{ name: ");
        let (status, records) = inspect_build_server(&path);
        assert!(status.exists);
        assert!(!status.parses);
        assert_eq!(records[0].severity, Severity::Error);
    }

    #[test]
    fn missing_keys_are_listed_in_one_record() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(&dir, r#"{"name": "bsp", "version": "1", "languages": null}"#);
        let (status, records) = inspect_build_server(&path);
        assert_eq!(status.missing_keys, vec!["bspVersion", "languages", "argv"]);
        assert_eq!(records.len(), 1);
        assert!(records[0].message.contains("bspVersion, languages, argv"));
    }

    #[test]
    fn dangling_workspace_is_reported() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(
            &dir,
            r#"{"name": "b", "version": "1", "bspVersion": "2", "languages": [], "argv": [],
                "workspace": "/definitely/not/here.xcworkspace"}"#,
        );
        let (status, records) = inspect_build_server(&path);
        assert_eq!(status.workspace_exists, Some(false));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Warning);
    }
}
