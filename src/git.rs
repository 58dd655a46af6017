//! Git plumbing used by the engine
//!
//! This uses the system git command for both halves of the engine's git
//! needs: `git apply` as the strict diff applicator, and `git status` /
//! `git checkout` for tracked-file inspection and self-healing of the live
//! checkout.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::{Error, Result};

/// Build a git command rooted at `root`.
///
/// Repository discovery is stopped at `root`'s parent, so a mirror that
/// lives inside some other working tree is never mistaken for part of it.
fn confined(root: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(root)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .env_remove("GIT_INDEX_FILE");
    if let Some(parent) = root.parent() {
        cmd.env("GIT_CEILING_DIRECTORIES", parent);
    }
    cmd
}

fn run(mut cmd: Command, root: &Path, description: &str) -> Result<Output> {
    cmd.output().map_err(|e| Error::GitCommand {
        command: description.to_string(),
        root: root.display().to_string(),
        stderr: e.to_string(),
    })
}

fn checked(output: Output, root: &Path, description: &str) -> Result<Output> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(Error::GitCommand {
            command: description.to_string(),
            root: root.display().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Dry-run a patch against `root` without touching any file.
///
/// Returns `Ok(None)` if the patch applies cleanly, or `Ok(Some(stderr))`
/// describing why it does not.
pub fn apply_check(root: &Path, patch: &Path) -> Result<Option<String>> {
    let mut cmd = confined(root);
    cmd.args(["apply", "--check", "--whitespace=nowarn"]).arg(patch);
    let output = run(cmd, root, "apply --check")?;
    if output.status.success() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&output.stderr).trim().to_string()))
    }
}

/// Apply a patch to `root`.
pub fn apply(root: &Path, patch: &Path) -> Result<()> {
    let mut cmd = confined(root);
    cmd.args(["apply", "--whitespace=nowarn"]).arg(patch);
    let output = run(cmd, root, "apply")?;
    checked(output, root, "apply")?;
    Ok(())
}

/// Whether `root` is the top of a git working tree.
pub fn is_work_tree(root: &Path) -> bool {
    let mut cmd = confined(root);
    cmd.args(["rev-parse", "--is-inside-work-tree"]);
    cmd.output()
        .map(|o| o.status.success() && String::from_utf8_lossy(&o.stdout).trim() == "true")
        .unwrap_or(false)
}

/// Tracked paths whose working-tree content differs from `HEAD`.
///
/// Untracked files are not reported. Paths are relative to `root`.
pub fn modified_tracked(root: &Path) -> Result<Vec<PathBuf>> {
    let mut cmd = confined(root);
    cmd.args(["status", "--porcelain", "-z", "--untracked-files=no"]);
    let output = checked(run(cmd, root, "status")?, root, "status")?;
    Ok(parse_porcelain_z(&output.stdout))
}

/// Parse `git status --porcelain -z` output into affected paths.
///
/// Renames and copies carry a second (original) path which is reported too.
pub fn parse_porcelain_z(stdout: &[u8]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let mut records = stdout.split(|&b| b == 0).filter(|r| !r.is_empty());
    while let Some(record) = records.next() {
        if record.len() < 4 {
            continue;
        }
        let status = &record[..2];
        paths.push(PathBuf::from(String::from_utf8_lossy(&record[3..]).into_owned()));
        if status.contains(&b'R') || status.contains(&b'C') {
            if let Some(original) = records.next() {
                paths.push(PathBuf::from(String::from_utf8_lossy(original).into_owned()));
            }
        }
    }
    paths
}

/// Whether `path` (relative to `root`) is tracked.
pub fn is_tracked(root: &Path, path: &Path) -> Result<bool> {
    let mut cmd = confined(root);
    cmd.args(["ls-files", "--error-unmatch", "--"]).arg(path);
    let output = run(cmd, root, "ls-files --error-unmatch")?;
    Ok(output.status.success())
}

/// Restore tracked paths to their committed content.
pub fn restore(root: &Path, paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let mut cmd = confined(root);
    cmd.args(["checkout", "HEAD", "--"]).args(paths);
    checked(run(cmd, root, "checkout HEAD --")?, root, "checkout HEAD --")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_porcelain_modified_and_staged() {
        let out = b" M src/a.py\0M  src/b.py\0";
        assert_eq!(
            parse_porcelain_z(out),
            vec![PathBuf::from("src/a.py"), PathBuf::from("src/b.py")]
        );
    }

    #[test]
    fn test_parse_porcelain_rename_reports_both_paths() {
        let out = b"R  new.py\0old.py\0 D gone.py\0";
        assert_eq!(
            parse_porcelain_z(out),
            vec![
                PathBuf::from("new.py"),
                PathBuf::from("old.py"),
                PathBuf::from("gone.py")
            ]
        );
    }

    #[test]
    fn test_parse_porcelain_paths_with_spaces() {
        let out = b" M dir/with space.txt\0";
        assert_eq!(
            parse_porcelain_z(out),
            vec![PathBuf::from("dir/with space.txt")]
        );
    }

    #[test]
    fn test_parse_porcelain_empty() {
        assert!(parse_porcelain_z(b"").is_empty());
    }

    // Commands that need a real repository are covered by the guard and
    // publish tests, which build throwaway repositories.
}
