//! Build-log adapter.
//!
//! Reads the most recent build log under the project's log directories and
//! understands two formats:
//!
//! - compiler text output (`file:line:col: error: message`, `error: message`)
//! - `xclogparser --reporter issues` JSON (`errors[]`, `warnings[]`)
//!
//! Unrecognized lines are counted, not fatal. A non-empty log in which
//! nothing at all is recognized yields a degraded status.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde::Deserialize;

use xcmon_core::types::{DiagnosticRecord, MonitoredProject, Origin, Severity};
use xcmon_resolver::most_recent_build_log;

use crate::error::{io_err, SourceError};
use crate::{path_from_file_url, Collection, DiagnosticSource};

pub struct BuildLogSource;

impl DiagnosticSource for BuildLogSource {
    fn origin(&self) -> Origin {
        Origin::BuildLog
    }

    fn collect(&self, project: &MonitoredProject) -> Collection {
        let Some(log) = most_recent_build_log(&project.artifacts.build_log_dirs) else {
            return Collection::unavailable("no build log found");
        };
        tracing::debug!(path = %log.path.display(), "reading build log");
        collect_from(&log.path, &project.path).unwrap_or_else(Collection::from)
    }
}

/// Parse the log at `path`; relative file paths resolve against `root`.
pub fn collect_from(path: &Path, root: &Path) -> Result<Collection, SourceError> {
    let bytes = fs::read(path).map_err(|e| io_err(path, e))?;
    let content = String::from_utf8_lossy(&bytes);

    if content.trim_start().starts_with('{') {
        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|source| SourceError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        return Ok(parse_issues_report(value, root));
    }

    Ok(parse_text(&content, root).into_collection())
}

// ---------------------------------------------------------------------------
// Compiler text output
// ---------------------------------------------------------------------------

/// Result of parsing compiler text output.
#[derive(Debug, Default)]
pub struct ParsedLog {
    pub records: Vec<DiagnosticRecord>,
    /// Non-blank lines that are neither diagnostics nor known banners.
    pub skipped: usize,
    /// Banner and progress lines.
    pub banners: usize,
}

impl ParsedLog {
    pub fn into_collection(self) -> Collection {
        if self.records.is_empty() && self.banners == 0 && self.skipped > 0 {
            return Collection::degraded("unrecognized build log format", Vec::new())
                .with_skipped(self.skipped);
        }
        Collection::ok(self.records).with_skipped(self.skipped)
    }
}

struct Patterns {
    located: Regex,
    project: Regex,
    banner: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        located: Regex::new(
            r"^(?P<file>[^:\s][^:]*):(?P<line>\d+)(?::(?P<col>\d+))?:\s*(?P<sev>fatal error|error|warning|note|remark):\s*(?P<msg>.*\S)\s*$",
        )
        .expect("valid located diagnostic regex"),
        project: Regex::new(r"^(?P<sev>fatal error|error|warning|note):\s*(?P<msg>.*\S)\s*$")
            .expect("valid project diagnostic regex"),
        banner: Regex::new(
            r"^(?:\*\*.*\*\*|Build complete!.*|Building for \S+.*|\[\d+/\d+\].*|\s*[\^~]+\s*)$",
        )
        .expect("valid banner regex"),
    })
}

pub fn parse_text(content: &str, root: &Path) -> ParsedLog {
    let patterns = patterns();
    let detected_at = Utc::now();
    let mut parsed = ParsedLog::default();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(caps) = patterns.located.captures(line) {
            let Some(severity) = Severity::from_keyword(&caps["sev"]) else {
                parsed.skipped += 1;
                continue;
            };
            let file = resolve_file(&caps["file"], root);
            let line_no = caps["line"].parse::<u32>().ok().filter(|n| *n > 0);
            let column = caps
                .name("col")
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .filter(|n| *n > 0);
            parsed.records.push(DiagnosticRecord {
                severity,
                origin: Origin::BuildLog,
                file: Some(file),
                line: line_no,
                column,
                message: caps["msg"].to_string(),
                detected_at,
            });
        } else if let Some(caps) = patterns.project.captures(line) {
            match Severity::from_keyword(&caps["sev"]) {
                Some(severity) => parsed.records.push(DiagnosticRecord {
                    detected_at,
                    ..DiagnosticRecord::project_level(severity, Origin::BuildLog, &caps["msg"])
                }),
                None => parsed.skipped += 1,
            }
        } else if patterns.banner.is_match(line) {
            parsed.banners += 1;
        } else {
            parsed.skipped += 1;
        }
    }

    parsed
}

fn resolve_file(raw: &str, root: &Path) -> PathBuf {
    resolve_path(PathBuf::from(raw.trim()), root)
}

fn resolve_path(path: PathBuf, root: &Path) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

// ---------------------------------------------------------------------------
// xclogparser issues report
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IssuesReport {
    #[serde(default)]
    errors: Vec<Issue>,
    #[serde(default)]
    warnings: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Issue {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "documentURL")]
    document_url: Option<String>,
    #[serde(default)]
    starting_line_number: Option<u32>,
    #[serde(default)]
    starting_column_number: Option<u32>,
}

fn parse_issues_report(value: serde_json::Value, root: &Path) -> Collection {
    let has_sections = value.get("errors").is_some() || value.get("warnings").is_some();
    let report: IssuesReport = match serde_json::from_value(value) {
        Ok(report) if has_sections => report,
        Ok(_) => return Collection::degraded("JSON log is not an issues report", Vec::new()),
        Err(err) => return Collection::degraded(format!("unrecognized issues report: {err}"), Vec::new()),
    };

    let detected_at = Utc::now();
    let mut skipped = 0;
    let mut records = Vec::new();
    let sections = [
        (Severity::Error, report.errors),
        (Severity::Warning, report.warnings),
    ];
    for (severity, issues) in sections {
        for issue in issues {
            let Some(title) = issue.title.filter(|t| !t.trim().is_empty()) else {
                skipped += 1;
                continue;
            };
            let mut record = DiagnosticRecord {
                detected_at,
                ..DiagnosticRecord::project_level(severity, Origin::BuildLog, title)
            };
            if let Some(file) = issue.document_url.as_deref().and_then(path_from_file_url) {
                record = record.at_location(
                    resolve_path(file, root),
                    issue.starting_line_number.filter(|n| *n > 0),
                    issue.starting_column_number.filter(|n| *n > 0),
                );
            }
            records.push(record);
        }
    }
    Collection::ok(records).with_skipped(skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xcmon_core::types::SourceStatus;

    const ROOT: &str = "/work/App";

    #[test]
    fn located_diagnostics_are_parsed() {
        let log = "\
/work/App/Sources/View.swift:12:5: error: cannot find 'foo' in scope
/work/App/Sources/Model.swift:3:1: warning: variable 'x' was never used
";
        let parsed = parse_text(log, Path::new(ROOT));
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.skipped, 0);

        let first = &parsed.records[0];
        assert_eq!(first.severity, Severity::Error);
        assert_eq!(first.file, Some(PathBuf::from("/work/App/Sources/View.swift")));
        assert_eq!(first.line, Some(12));
        assert_eq!(first.column, Some(5));
        assert_eq!(first.message, "cannot find 'foo' in scope");
    }

    #[test]
    fn relative_paths_resolve_against_root() {
        let parsed = parse_text("Sources/App.swift:7: note: declared here", Path::new(ROOT));
        let record = &parsed.records[0];
        assert_eq!(record.file, Some(PathBuf::from("/work/App/Sources/App.swift")));
        assert_eq!(record.column, None);
        assert_eq!(record.severity, Severity::Note);
    }

    #[test]
    fn project_level_lines_have_no_location() {
        let parsed = parse_text("error: no such module 'Alamofire'", Path::new(ROOT));
        let record = &parsed.records[0];
        assert_eq!(record.file, None);
        assert_eq!(record.line, None);
        assert_eq!(record.message, "no such module 'Alamofire'");
    }

    #[test]
    fn banners_are_not_skipped() {
        let log = "\
Building for debugging...
[1/4] Compiling App main.swift
** BUILD SUCCEEDED **
Build complete! (1.23s)
";
        let parsed = parse_text(log, Path::new(ROOT));
        assert_eq!(parsed.banners, 4);
        assert_eq!(parsed.skipped, 0);
        assert_eq!(parsed.into_collection().status, SourceStatus::Ok);
    }

    #[test]
    fn wholly_unrecognized_log_is_degraded() {
        let collection = parse_text("\u{1}\u{2}garbage\nmore garbage\n", Path::new(ROOT))
            .into_collection();
        assert!(matches!(collection.status, SourceStatus::Degraded { .. }));
        assert!(collection.records.is_empty());
        assert_eq!(collection.skipped, 2);
    }

    #[test]
    fn empty_log_is_ok() {
        let collection = parse_text("\n\n", Path::new(ROOT)).into_collection();
        assert_eq!(collection.status, SourceStatus::Ok);
        assert!(collection.records.is_empty());
    }

    #[test]
    fn issues_report_is_normalized() {
        let report = json!({
            "errors": [{
                "title": "Use of unresolved identifier 'bar'",
                "documentURL": "file:///work/App/Sources/My%20View.swift",
                "startingLineNumber": 40,
                "startingColumnNumber": 9
            }],
            "warnings": [
                {"title": "Deprecated API", "documentURL": ""},
                {"documentURL": "file:///work/App/x.swift"}
            ]
        });
        let collection = parse_issues_report(report, Path::new(ROOT));
        assert_eq!(collection.status, SourceStatus::Ok);
        assert_eq!(collection.records.len(), 2);
        assert_eq!(collection.skipped, 1);

        let error = &collection.records[0];
        assert_eq!(error.file, Some(PathBuf::from("/work/App/Sources/My View.swift")));
        assert_eq!(error.line, Some(40));
        let warning = &collection.records[1];
        assert_eq!(warning.severity, Severity::Warning);
        assert_eq!(warning.file, None);
    }

    #[test]
    fn unrelated_json_is_degraded() {
        let collection = parse_issues_report(json!({"version": 1}), Path::new(ROOT));
        assert!(matches!(collection.status, SourceStatus::Degraded { .. }));
    }
}
