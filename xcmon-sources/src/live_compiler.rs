//! Live-compiler adapter: Xcode's own `*.xcdiagnostics` documents.
//!
//! Only the newest document in the live diagnostics directory is read, and
//! only when it was written within the last hour. Both known layouts are
//! accepted:
//!
//! ```text
//! diagnostics[]        severity (int, >= 3 is an error), description,
//!                      location { path, line }
//! diagnostics-items[]  kind ("...error..."), message,
//!                      diagnostic-context { file-path, line-number }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use plist::{Dictionary, Value};

use xcmon_core::types::{DiagnosticRecord, MonitoredProject, Origin, Severity};

use crate::error::SourceError;
use crate::{Collection, DiagnosticSource};

pub const DOCUMENT_EXTENSION: &str = "xcdiagnostics";

const MAX_AGE: Duration = Duration::from_secs(60 * 60);
const MAX_RECORDS: usize = 20;

#[derive(Debug, Clone)]
pub struct LiveCompilerSource {
    max_age: Duration,
    max_records: usize,
}

impl Default for LiveCompilerSource {
    fn default() -> Self {
        Self {
            max_age: MAX_AGE,
            max_records: MAX_RECORDS,
        }
    }
}

impl DiagnosticSource for LiveCompilerSource {
    fn origin(&self) -> Origin {
        Origin::LiveCompiler
    }

    fn collect(&self, project: &MonitoredProject) -> Collection {
        let Some(dir) = project.artifacts.live_diagnostics_dir.as_deref() else {
            return Collection::unavailable("live diagnostics directory not configured");
        };
        let Some((document, modified)) = newest_document(dir) else {
            return Collection::unavailable(format!(
                "no live diagnostics under {}",
                dir.display()
            ));
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age > self.max_age {
            return Collection::unavailable(format!(
                "live diagnostics are {} minutes old",
                age.as_secs() / 60
            ));
        }

        let value = match Value::from_file(&document) {
            Ok(value) => value,
            Err(source) => {
                let err = SourceError::Plist {
                    path: document,
                    source,
                };
                return Collection::degraded(err.to_string(), Vec::new());
            }
        };
        self.parse_document(&value, &project.path)
    }
}

/// Current live diagnostics for `project`.
pub fn read_live_diagnostics(project: &MonitoredProject) -> Collection {
    LiveCompilerSource::default().collect(project)
}

impl LiveCompilerSource {
    fn parse_document(&self, value: &Value, root: &Path) -> Collection {
        let Some(doc) = value.as_dictionary() else {
            return Collection::degraded("live diagnostics document is not a dictionary", Vec::new());
        };

        let workspace = ["workspacePath", "workspace", "project"]
            .iter()
            .find_map(|key| doc.get(key).and_then(Value::as_string))
            .map(PathBuf::from);
        if let Some(workspace) = workspace.as_deref() {
            if workspace.exists() && !is_under(workspace, root) {
                tracing::debug!(workspace = %workspace.display(), "live diagnostics belong to another workspace");
                return Collection::ok(Vec::new());
            }
        }

        let (items, layout): (&[Value], Layout) =
            if let Some(items) = doc.get("diagnostics").and_then(Value::as_array) {
                (items.as_slice(), Layout::Diagnostics)
            } else if let Some(items) = doc.get("diagnostics-items").and_then(Value::as_array) {
                (items.as_slice(), Layout::Items)
            } else {
                return Collection::degraded("unrecognized live diagnostics layout", Vec::new());
            };

        let detected_at = Utc::now();
        let mut skipped = 0;
        let mut records = Vec::new();
        for item in items {
            let Some(entry) = item.as_dictionary().and_then(|d| layout.entry(d)) else {
                skipped += 1;
                continue;
            };
            if let Some(file) = entry.file.as_deref() {
                if workspace.is_none() && file.exists() && !is_under(file, root) {
                    continue;
                }
            }
            let mut record = DiagnosticRecord {
                detected_at,
                ..DiagnosticRecord::project_level(entry.severity, Origin::LiveCompiler, entry.message)
            };
            if let Some(file) = entry.file {
                record = record.at_location(file, entry.line, None);
            }
            records.push(record);
            if records.len() == self.max_records {
                break;
            }
        }
        Collection::ok(records).with_skipped(skipped)
    }
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    Diagnostics,
    Items,
}

struct Entry {
    severity: Severity,
    file: Option<PathBuf>,
    line: Option<u32>,
    message: String,
}

impl Layout {
    fn entry(self, item: &Dictionary) -> Option<Entry> {
        let (severity, location, file_key, line_key, message_key) = match self {
            Layout::Diagnostics => {
                let level = item.get("severity").and_then(Value::as_signed_integer).unwrap_or(0);
                let severity = if level >= 3 { Severity::Error } else { Severity::Warning };
                (severity, item.get("location"), "path", "line", "description")
            }
            Layout::Items => {
                let kind = item.get("kind").and_then(Value::as_string).unwrap_or_default();
                let severity = if kind.to_ascii_lowercase().contains("error") {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                (
                    severity,
                    item.get("diagnostic-context"),
                    "file-path",
                    "line-number",
                    "message",
                )
            }
        };

        let message = item.get(message_key).and_then(Value::as_string)?.to_string();
        let location = location.and_then(Value::as_dictionary);
        let file = location
            .and_then(|l| l.get(file_key))
            .and_then(Value::as_string)
            .filter(|p| !p.is_empty() && *p != "Unknown")
            .map(PathBuf::from);
        let line = location
            .and_then(|l| l.get(line_key))
            .and_then(Value::as_signed_integer)
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok());

        Some(Entry {
            severity,
            file,
            line,
            message,
        })
    }
}

/// Newest `*.xcdiagnostics` file in `dir` with its modification time.
fn newest_document(dir: &Path) -> Option<(PathBuf, SystemTime)> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .map(|x| x == DOCUMENT_EXTENSION)
                .unwrap_or(false)
        })
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((e.path(), modified))
        })
        .max_by_key(|(_, modified)| *modified)
}

fn is_under(path: &Path, root: &Path) -> bool {
    if path.starts_with(root) {
        return true;
    }
    match (fs::canonicalize(path), fs::canonicalize(root)) {
        (Ok(path), Ok(root)) => path.starts_with(root),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;
    use xcmon_core::types::{ArtifactPaths, SourceStatus};

    fn project(root: &Path, live_dir: &Path) -> MonitoredProject {
        MonitoredProject {
            path: root.to_path_buf(),
            valid: true,
            workspaces: Vec::new(),
            projects: Vec::new(),
            referenced_projects: Vec::new(),
            schemes: Vec::new(),
            artifacts: ArtifactPaths {
                live_diagnostics_dir: Some(live_dir.to_path_buf()),
                ..ArtifactPaths::default()
            },
            discovered_at: Utc::now(),
        }
    }

    fn plist(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
{body}
</dict>
</plist>
"#
        )
    }

    fn diagnostic(severity: i64, path: &str, line: i64, description: &str) -> String {
        format!(
            "<dict><key>severity</key><integer>{severity}</integer>\
             <key>description</key><string>{description}</string>\
             <key>location</key><dict><key>path</key><string>{path}</string>\
             <key>line</key><integer>{line}</integer></dict></dict>"
        )
    }

    #[test]
    fn diagnostics_layout_is_parsed() {
        let root = TempDir::new().expect("root");
        let live = TempDir::new().expect("live");
        let inside = root.path().join("A.swift");
        fs::write(&inside, "").expect("source");
        let body = format!(
            "<key>diagnostics</key><array>{}{}</array>",
            diagnostic(3, &inside.display().to_string(), 4, "Expected ';'"),
            diagnostic(1, "/nowhere/B.swift", 0, "Deprecated"),
        );
        fs::write(live.path().join("a.xcdiagnostics"), plist(&body)).expect("doc");

        let collection = LiveCompilerSource::default().collect(&project(root.path(), live.path()));
        assert_eq!(collection.status, SourceStatus::Ok);
        assert_eq!(collection.records.len(), 2);
        assert_eq!(collection.records[0].severity, Severity::Error);
        assert_eq!(collection.records[0].line, Some(4));
        assert_eq!(collection.records[1].severity, Severity::Warning);
        assert_eq!(collection.records[1].line, None);
    }

    #[test]
    fn items_layout_is_parsed() {
        let root = TempDir::new().expect("root");
        let live = TempDir::new().expect("live");
        let body = "<key>diagnostics-items</key><array>\
            <dict><key>kind</key><string>swift-error</string>\
            <key>message</key><string>Type mismatch</string>\
            <key>diagnostic-context</key><dict>\
            <key>file-path</key><string>/somewhere/C.swift</string>\
            <key>line-number</key><integer>12</integer></dict></dict>\
            <dict><key>kind</key><string>note</string></dict>\
            </array>";
        fs::write(live.path().join("b.xcdiagnostics"), plist(body)).expect("doc");

        let collection = LiveCompilerSource::default().collect(&project(root.path(), live.path()));
        assert_eq!(collection.records.len(), 1);
        assert_eq!(collection.skipped, 1);
        let record = &collection.records[0];
        assert_eq!(record.severity, Severity::Error);
        assert_eq!(record.file, Some(PathBuf::from("/somewhere/C.swift")));
        assert_eq!(record.line, Some(12));
    }

    #[test]
    fn files_outside_root_are_dropped() {
        let root = TempDir::new().expect("root");
        let other = TempDir::new().expect("other");
        let live = TempDir::new().expect("live");
        let outside = other.path().join("D.swift");
        fs::write(&outside, "").expect("source");
        let body = format!(
            "<key>diagnostics</key><array>{}</array>",
            diagnostic(3, &outside.display().to_string(), 1, "elsewhere")
        );
        fs::write(live.path().join("c.xcdiagnostics"), plist(&body)).expect("doc");

        let collection = LiveCompilerSource::default().collect(&project(root.path(), live.path()));
        assert!(collection.records.is_empty());
    }

    #[test]
    fn stale_document_is_ignored() {
        let root = TempDir::new().expect("root");
        let live = TempDir::new().expect("live");
        let doc = live.path().join("old.xcdiagnostics");
        let body = format!("<key>diagnostics</key><array>{}</array>", diagnostic(3, "/x.swift", 1, "old"));
        fs::write(&doc, plist(&body)).expect("doc");
        let two_hours_ago = SystemTime::now() - Duration::from_secs(2 * 60 * 60);
        set_file_mtime(&doc, FileTime::from_system_time(two_hours_ago)).expect("mtime");

        let collection = LiveCompilerSource::default().collect(&project(root.path(), live.path()));
        assert!(collection.status.is_unavailable());
    }

    #[test]
    fn records_are_capped() {
        let root = TempDir::new().expect("root");
        let live = TempDir::new().expect("live");
        let items: String = (1..=30)
            .map(|n| diagnostic(3, "/gone/E.swift", n, &format!("issue {n}")))
            .collect();
        let body = format!("<key>diagnostics</key><array>{items}</array>");
        fs::write(live.path().join("many.xcdiagnostics"), plist(&body)).expect("doc");

        let collection = LiveCompilerSource::default().collect(&project(root.path(), live.path()));
        assert_eq!(collection.records.len(), MAX_RECORDS);
    }

    #[test]
    fn unreadable_document_is_degraded() {
        let root = TempDir::new().expect("root");
        let live = TempDir::new().expect("live");
        fs::write(
            live.path().join("bad.xcdiagnostics"),
            r#"<?xml version="1.0"?><plist version="1.0"><dict><key>broken"#,
        )
        .expect("doc");

        let collection = LiveCompilerSource::default().collect(&project(root.path(), live.path()));
        assert!(matches!(collection.status, SourceStatus::Degraded { .. }));
    }

    #[test]
    fn missing_directory_is_unavailable() {
        let root = TempDir::new().expect("root");
        let collection =
            LiveCompilerSource::default().collect(&project(root.path(), &root.path().join("nope")));
        assert!(collection.status.is_unavailable());
    }
}
