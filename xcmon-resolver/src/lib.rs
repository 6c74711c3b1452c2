//! Project discovery for `xcmon-resolver`.
//!
//! `discover(root)` walks a monitored root and returns the IDE project markers
//! beneath it: `*.xcworkspace` and `*.xcodeproj` bundles and `Package.swift`
//! manifests. Marker bundles are never descended into, symbolic links are only
//! followed when they resolve inside the root, and every directory is visited
//! at most once.

pub mod artifacts;

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;

use xcmon_core::types::MonitoredProject;

pub use artifacts::{
    artifact_paths, most_recent_build_log, scheme_from_build_server, scheme_from_value, BuildLogArtifact,
    ResolverOptions, BUILD_SERVER_CONFIG,
};

/// Maximum directory depth below the root that discovery inspects.
pub const MAX_DEPTH: usize = 8;

/// Directory names that never contain project markers worth reporting.
const SKIPPED_DIRS: &[&str] = &["DerivedData", "build", "node_modules", "Pods", "Carthage"];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Kind of a discovered marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Workspace,
    Project,
    Package,
}

/// Markers and schemes found beneath a root.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Discovery {
    pub workspaces: Vec<PathBuf>,
    /// `*.xcodeproj` bundles and `Package.swift` manifests.
    pub projects: Vec<PathBuf>,
    /// Projects named by a workspace's `contents.xcworkspacedata`.
    pub referenced_projects: Vec<PathBuf>,
    pub schemes: Vec<String>,
}

impl Discovery {
    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty() && self.projects.is_empty()
    }
}

/// Errors from root validation and discovery.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid root {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ResolveError> for xcmon_core::MonitorError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidRoot { path, reason } => {
                xcmon_core::MonitorError::InvalidRoot { path, reason }
            }
            ResolveError::Io { path, source } => xcmon_core::MonitorError::InvalidRoot {
                path,
                reason: source.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Make `path` absolute and check that it names an existing directory.
///
/// The path is not canonicalized: callers get back the spelling they passed.
pub fn validate_root(path: &Path) -> Result<PathBuf, ResolveError> {
    if path.as_os_str().is_empty() {
        return Err(invalid(path, "path is empty"));
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|source| ResolveError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .join(path)
    };
    match fs::metadata(&absolute) {
        Ok(meta) if meta.is_dir() => Ok(absolute),
        Ok(_) => Err(invalid(&absolute, "not a directory")),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(invalid(&absolute, "does not exist")),
        Err(err) => Err(invalid(&absolute, &err.to_string())),
    }
}

/// Discover project markers beneath `root`.
///
/// A valid root without markers yields an empty [`Discovery`], not an error.
pub fn discover(root: &Path) -> Result<Discovery, ResolveError> {
    let root = validate_root(root)?;
    let canonical_root = fs::canonicalize(&root).map_err(|e| io_err(&root, e))?;

    let mut discovery = Discovery::default();
    let mut visited = HashSet::new();
    visited.insert(canonical_root.clone());

    // (display path, depth); display paths keep the caller's spelling.
    let mut queue = vec![(root.clone(), 0usize)];
    let mut cursor = 0;
    while cursor < queue.len() {
        let (dir, depth) = queue[cursor].clone();
        cursor += 1;

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                tracing::debug!(path = %dir.display(), error = %err, "skipping unreadable directory");
                continue;
            }
            Err(err) => return Err(io_err(&dir, err)),
        };

        let mut children: Vec<_> = entries.filter_map(|e| e.ok()).collect();
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            let is_dir = if file_type.is_symlink() {
                match symlink_dir_inside(&path, &canonical_root) {
                    Some(target) => {
                        if !visited.insert(target) {
                            continue;
                        }
                        true
                    }
                    None => continue,
                }
            } else {
                file_type.is_dir()
            };

            match marker_kind(&path, is_dir) {
                Some(MarkerKind::Workspace) => {
                    discovery
                        .referenced_projects
                        .extend(workspace_project_refs(&path));
                    discovery.schemes.extend(bundle_schemes(&path));
                    discovery.workspaces.push(path);
                }
                Some(MarkerKind::Project) => {
                    discovery.schemes.extend(bundle_schemes(&path));
                    discovery.projects.push(path);
                }
                Some(MarkerKind::Package) => discovery.projects.push(path),
                None if is_dir && depth < MAX_DEPTH && should_descend(&path) => {
                    if !file_type.is_symlink() {
                        if let Ok(canonical) = fs::canonicalize(&path) {
                            if !visited.insert(canonical) {
                                continue;
                            }
                        }
                    }
                    queue.push((path, depth + 1));
                }
                None => {}
            }
        }
    }

    discovery.workspaces.sort();
    discovery.projects.sort();
    discovery.referenced_projects.sort();
    discovery.referenced_projects.dedup();
    discovery.schemes.sort();
    discovery.schemes.dedup();
    Ok(discovery)
}

/// Validate `root`, discover its markers and artifact paths, and build the
/// [`MonitoredProject`] that replaces the active one.
pub fn resolve(root: &Path, options: &ResolverOptions) -> Result<MonitoredProject, ResolveError> {
    let path = validate_root(root)?;
    let mut discovery = discover(&path)?;
    let artifacts = artifact_paths(&path, options);

    if let Some(scheme) = scheme_from_build_server(&artifacts.build_server_config) {
        if !discovery.schemes.contains(&scheme) {
            discovery.schemes.push(scheme);
            discovery.schemes.sort();
        }
    }

    tracing::debug!(
        root = %path.display(),
        workspaces = discovery.workspaces.len(),
        projects = discovery.projects.len(),
        schemes = discovery.schemes.len(),
        "resolved monitored project",
    );

    Ok(MonitoredProject {
        path,
        valid: true,
        workspaces: discovery.workspaces,
        projects: discovery.projects,
        referenced_projects: discovery.referenced_projects,
        schemes: discovery.schemes,
        artifacts,
        discovered_at: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

fn marker_kind(path: &Path, is_dir: bool) -> Option<MarkerKind> {
    let name = path.file_name()?.to_str()?;
    if is_dir {
        let ext = path.extension().and_then(|e| e.to_str())?;
        if ext.eq_ignore_ascii_case("xcworkspace") {
            return Some(MarkerKind::Workspace);
        }
        if ext.eq_ignore_ascii_case("xcodeproj") {
            return Some(MarkerKind::Project);
        }
        return None;
    }
    (name == "Package.swift").then_some(MarkerKind::Package)
}

fn should_descend(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.') && !SKIPPED_DIRS.contains(&name)
}

/// Canonical target of a symlinked directory, if it stays inside the root.
fn symlink_dir_inside(path: &Path, canonical_root: &Path) -> Option<PathBuf> {
    let target = fs::canonicalize(path).ok()?;
    (target.is_dir() && target.starts_with(canonical_root) && target != canonical_root)
        .then_some(target)
}

/// Scheme names shared or user-defined inside a workspace/project bundle.
fn bundle_schemes(bundle: &Path) -> Vec<String> {
    let mut dirs = vec![bundle.join("xcshareddata").join("xcschemes")];
    if let Ok(users) = fs::read_dir(bundle.join("xcuserdata")) {
        for user in users.filter_map(|e| e.ok()) {
            dirs.push(user.path().join("xcschemes"));
        }
    }

    let mut schemes = Vec::new();
    for dir in dirs {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_scheme = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "xcscheme")
                .unwrap_or(false);
            if is_scheme {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    schemes.push(stem.to_string());
                }
            }
        }
    }
    schemes
}

/// Projects referenced by `<workspace>/contents.xcworkspacedata`.
///
/// `group:` and `container:` locations are relative to the workspace's parent.
fn workspace_project_refs(workspace: &Path) -> Vec<PathBuf> {
    let Ok(contents) = fs::read_to_string(workspace.join("contents.xcworkspacedata")) else {
        return Vec::new();
    };
    let base = workspace.parent().unwrap_or(workspace);
    let mut refs = Vec::new();
    for line in contents.lines() {
        let Some(start) = line.find("location = \"") else {
            continue;
        };
        let rest = &line[start + "location = \"".len()..];
        let Some(end) = rest.find('"') else {
            continue;
        };
        let location = &rest[..end];
        let relative = location
            .strip_prefix("group:")
            .or_else(|| location.strip_prefix("container:"));
        if let Some(relative) = relative {
            if relative.ends_with(".xcodeproj") {
                refs.push(base.join(relative));
            }
        } else if let Some(absolute) = location.strip_prefix("absolute:") {
            if absolute.ends_with(".xcodeproj") {
                refs.push(PathBuf::from(absolute));
            }
        }
    }
    refs
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn invalid(path: &Path, reason: &str) -> ResolveError {
    ResolveError::InvalidRoot {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn io_err(path: &Path, source: std::io::Error) -> ResolveError {
    ResolveError::Io {
        path: path.to_path_buf(),
        source,
    }
}
