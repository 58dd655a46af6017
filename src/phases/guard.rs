//! Dirty-Tree Guard
//!
//! Confirms that the pristine checkout's tracked files are unmodified. The
//! guard is a post-condition check: a stage that promises not to touch the
//! checkout is bracketed by a [`Snapshot`] and a [`check_since`] call.
//!
//! Sensitivity depends on the mode. Publishing directly onto the checkout
//! uses [`GuardMode::Enforce`], where any finding aborts. Overlay stages use
//! [`GuardMode::Warn`] and only log a bounded listing.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use log::warn;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::git;

/// How a non-clean report is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    /// Any finding is a `DirtyTree` error.
    Enforce,
    /// Findings are logged as a warning.
    Warn,
}

/// Result of a guard check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardReport {
    pub root: PathBuf,
    pub clean: bool,
    pub modified_paths: Vec<PathBuf>,
}

impl GuardReport {
    fn from_paths(root: &Path, modified_paths: Vec<PathBuf>) -> Self {
        Self {
            root: root.to_path_buf(),
            clean: modified_paths.is_empty(),
            modified_paths,
        }
    }
}

/// Tracked paths that differ from `HEAD`, with a fingerprint of their
/// working-tree content.
#[derive(Debug, Clone)]
pub struct Snapshot {
    root: PathBuf,
    tracked: bool,
    entries: BTreeMap<PathBuf, Option<u64>>,
}

impl Snapshot {
    /// Record the current state of `root`.
    pub fn capture(root: &Path) -> Result<Self> {
        let tracked = git::is_work_tree(root);
        let mut entries = BTreeMap::new();
        if tracked {
            for path in git::modified_tracked(root)? {
                let fingerprint = fingerprint(&root.join(&path));
                entries.insert(path, fingerprint);
            }
        }
        Ok(Self {
            root: root.to_path_buf(),
            tracked,
            entries,
        })
    }

    /// Paths that were already modified when the snapshot was taken
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.keys()
    }
}

fn fingerprint(path: &Path) -> Option<u64> {
    let content = fs::read(path).ok()?;
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    Some(hasher.finish())
}

/// Report every tracked file of `root` that differs from `HEAD`.
///
/// A directory that is not a git working tree has nothing tracked and is
/// reported clean.
pub fn check(root: &Path) -> Result<GuardReport> {
    if !git::is_work_tree(root) {
        warn!(
            "{} is not a git working tree; tracked-file guard skipped",
            root.display()
        );
        return Ok(GuardReport::from_paths(root, Vec::new()));
    }
    Ok(GuardReport::from_paths(root, git::modified_tracked(root)?))
}

/// Report tracked files changed since `before` was captured.
///
/// Files that were already modified are reported only if their content
/// changed in between.
pub fn check_since(before: &Snapshot) -> Result<GuardReport> {
    let root = &before.root;
    if !before.tracked {
        return check(root);
    }
    let modified = git::modified_tracked(root)?
        .into_iter()
        .filter(|path| match before.entries.get(path) {
            None => true,
            Some(previous) => fingerprint(&root.join(path)) != *previous,
        })
        .collect();
    Ok(GuardReport::from_paths(root, modified))
}

/// Apply the mode's sensitivity to a report.
pub fn enforce(report: &GuardReport, mode: GuardMode, cap: usize) -> Result<()> {
    if report.clean {
        return Ok(());
    }
    match mode {
        GuardMode::Enforce => Err(Error::DirtyTree {
            root: report.root.display().to_string(),
            paths: report
                .modified_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
        }),
        GuardMode::Warn => {
            warn!(
                "{} tracked file(s) modified in {}:\n{}",
                report.modified_paths.len(),
                report.root.display(),
                format_listing(&report.modified_paths, cap)
            );
            Ok(())
        }
    }
}

/// Indented listing of at most `cap` paths.
pub fn format_listing(paths: &[PathBuf], cap: usize) -> String {
    let mut lines: Vec<String> = paths
        .iter()
        .take(cap)
        .map(|p| format!("  {}", p.display()))
        .collect();
    if paths.len() > cap {
        lines.push(format!("  ... and {} more", paths.len() - cap));
    }
    lines.join("\n")
}


#[cfg(test)]
mod tests {
    use super::test_repo::{git_available, init_with};
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_listing_is_bounded() {
        let paths: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("f{}.py", i))).collect();
        let listing = format_listing(&paths, 2);
        assert_eq!(listing, "  f0.py\n  f1.py\n  ... and 3 more");
        assert_eq!(format_listing(&paths[..1], 2), "  f0.py");
    }

    #[test]
    fn test_enforce_modes() {
        let dirty = GuardReport {
            root: PathBuf::from("/src"),
            clean: false,
            modified_paths: vec![PathBuf::from("setup.py")],
        };
        assert!(enforce(&dirty, GuardMode::Warn, 10).is_ok());
        match enforce(&dirty, GuardMode::Enforce, 10) {
            Err(Error::DirtyTree { paths, .. }) => assert_eq!(paths, vec!["setup.py"]),
            other => panic!("expected DirtyTree, got {:?}", other),
        }

        let clean = GuardReport::from_paths(Path::new("/src"), vec![]);
        assert!(clean.clean);
        assert!(enforce(&clean, GuardMode::Enforce, 10).is_ok());
    }

    #[test]
    fn test_non_repository_is_clean() {
        let temp = TempDir::new().unwrap();
        let report = check(temp.path()).unwrap();
        assert!(report.clean);
    }

    #[test]
    fn test_tracked_write_is_reported_and_restore_flips_clean() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        init_with(temp.path(), &[("setup.py", "print('pristine')\n")]);

        assert!(check(temp.path()).unwrap().clean);

        fs::write(temp.path().join("setup.py"), "print('override')\n").unwrap();
        let report = check(temp.path()).unwrap();
        assert!(!report.clean);
        assert_eq!(report.modified_paths, vec![PathBuf::from("setup.py")]);

        git::restore(temp.path(), &[PathBuf::from("setup.py")]).unwrap();
        assert!(check(temp.path()).unwrap().clean);
    }

    #[test]
    fn test_untracked_files_are_ignored() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        init_with(temp.path(), &[("setup.py", "x\n")]);
        fs::write(temp.path().join("scratch.txt"), "new\n").unwrap();
        assert!(check(temp.path()).unwrap().clean);
    }

    #[test]
    fn test_check_since_ignores_preexisting_edits() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        init_with(temp.path(), &[("a.py", "a\n"), ("b.py", "b\n")]);
        fs::write(temp.path().join("a.py"), "local edit\n").unwrap();

        let before = Snapshot::capture(temp.path()).unwrap();
        assert_eq!(before.paths().count(), 1);
        assert!(check_since(&before).unwrap().clean);

        fs::write(temp.path().join("b.py"), "stage edit\n").unwrap();
        let report = check_since(&before).unwrap();
        assert_eq!(report.modified_paths, vec![PathBuf::from("b.py")]);

        fs::write(temp.path().join("a.py"), "edited again\n").unwrap();
        let report = check_since(&before).unwrap();
        assert_eq!(
            report.modified_paths,
            vec![PathBuf::from("a.py"), PathBuf::from("b.py")]
        );
    }
}
