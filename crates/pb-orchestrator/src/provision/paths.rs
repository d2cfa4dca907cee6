//! Path-safety predicate and guarded directory removal
//!
//! Destructive filesystem operations only ever touch a directory whose own
//! name, or whose parent's name, is the managed service's canonical folder
//! name. Everything else is reported as skipped and left untouched.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Reason recorded when the predicate rejects a path
pub const UNSAFE_PATH_REASON: &str = "caminho_unsafe";

/// Reason recorded when there is nothing to remove
pub const NOT_FOUND_REASON: &str = "not_found";

/// Absolute form of `path` without touching the filesystem
///
/// Returns `None` for paths that climb with `..`, which are never trusted.
fn absolute(path: &Path) -> Option<PathBuf> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }
    if path.is_absolute() {
        Some(path.to_path_buf())
    } else {
        std::env::current_dir().ok().map(|cwd| cwd.join(path))
    }
}

/// Whether destructive operations on `path` are allowed
pub fn is_safe_target(path: &Path, folder_name: &str) -> bool {
    if folder_name.trim().is_empty() {
        return false;
    }
    let Some(abs) = absolute(path) else {
        return false;
    };

    let mut names = abs.components().rev().filter_map(|c| match c {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    });
    let last = names.next();
    let parent = names.next();

    last.as_deref() == Some(folder_name) || parent.as_deref() == Some(folder_name)
}

/// Outcome of one guarded removal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryReport {
    pub path: PathBuf,
    pub removed: bool,
    pub skipped: bool,
    pub reason: Option<String>,
}

impl DirectoryReport {
    /// Whether this removal left an unresolved problem
    pub fn is_problem(&self) -> bool {
        !self.removed && self.reason.as_deref() != Some(NOT_FOUND_REASON)
    }
}

/// Remove `path` recursively if it passes the safety predicate
pub fn remove_directory(path: &Path, folder_name: &str) -> DirectoryReport {
    let mut report = DirectoryReport {
        path: path.to_path_buf(),
        removed: false,
        skipped: false,
        reason: None,
    };

    if !is_safe_target(path, folder_name) {
        tracing::warn!("Refusing to remove {:?}: unsafe path", path);
        report.skipped = true;
        report.reason = Some(UNSAFE_PATH_REASON.to_string());
        return report;
    }

    if !path.exists() {
        report.skipped = true;
        report.reason = Some(NOT_FOUND_REASON.to_string());
        return report;
    }

    match fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::info!("Removed {:?}", path);
            report.removed = true;
        }
        Err(e) => {
            tracing::warn!("Failed to remove {:?}: {}", path, e);
            report.reason = Some(e.to_string());
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FOLDER: &str = "whatsapp-service";

    #[test]
    fn test_safe_when_last_or_parent_segment_matches() {
        assert!(is_safe_target(Path::new("/opt/app/whatsapp-service"), FOLDER));
        assert!(is_safe_target(Path::new("/opt/whatsapp-service/current"), FOLDER));
        assert!(is_safe_target(Path::new("/opt/app/whatsapp-service/"), FOLDER));
    }

    #[test]
    fn test_unsafe_paths() {
        assert!(!is_safe_target(Path::new("/"), FOLDER));
        assert!(!is_safe_target(Path::new("/home/user"), FOLDER));
        assert!(!is_safe_target(Path::new("/whatsapp-service/a/b"), FOLDER));
        assert!(!is_safe_target(Path::new("/opt/whatsapp-service-old"), FOLDER));
        assert!(!is_safe_target(Path::new("/opt/whatsapp-service/.."), FOLDER));
        assert!(!is_safe_target(Path::new("/opt/whatsapp-service"), ""));
    }

    #[test]
    fn test_remove_unsafe_path_leaves_filesystem_untouched() {
        let dir = TempDir::new().unwrap();
        let victim = dir.path().join("documents");
        fs::create_dir_all(victim.join("nested")).unwrap();
        fs::write(victim.join("nested").join("file.txt"), "keep").unwrap();

        let report = remove_directory(&victim, FOLDER);
        assert!(report.skipped);
        assert!(!report.removed);
        assert_eq!(report.reason.as_deref(), Some(UNSAFE_PATH_REASON));
        assert!(report.is_problem());
        assert!(victim.join("nested").join("file.txt").exists());
    }

    #[test]
    fn test_remove_safe_directory() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join(FOLDER);
        fs::create_dir_all(target.join("node_modules")).unwrap();
        fs::write(target.join("package.json"), "{}").unwrap();

        let report = remove_directory(&target, FOLDER);
        assert!(report.removed);
        assert!(!report.is_problem());
        assert!(!target.exists());
    }

    #[test]
    fn test_remove_missing_directory_is_not_a_problem() {
        let dir = TempDir::new().unwrap();
        let report = remove_directory(&dir.path().join(FOLDER), FOLDER);
        assert!(report.skipped);
        assert_eq!(report.reason.as_deref(), Some(NOT_FOUND_REASON));
        assert!(!report.is_problem());
    }
}
