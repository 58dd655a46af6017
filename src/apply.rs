//! Strict diff application
//!
//! A patch is applied in two phases: a non-mutating check, then the real
//! apply only if the check passed. A failed check therefore leaves the tree
//! exactly as it was, which is what lets a fallback transform run against
//! untouched content afterwards.

use std::path::Path;

use log::{debug, warn};

use crate::catalog::PatchDescriptor;
use crate::error::Result;
use crate::git;
use crate::normalize;

/// Result of a strict application attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The patch applied cleanly.
    Applied,
    /// The check phase rejected the patch; nothing was modified.
    Failed { reason: String },
}

impl ApplyOutcome {
    /// Whether the patch was applied
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// Apply one catalog entry to `root`.
///
/// The payload and every file it touches are normalized first. `root` must
/// be a tree the caller owns (an overlay root); targets are rewritten in
/// place when they carry CRLF line endings.
pub fn apply_strict(descriptor: &PatchDescriptor, root: &Path) -> Result<ApplyOutcome> {
    if !descriptor.looks_like_unified_diff() {
        warn!(
            "{} does not look like a unified diff; attempting anyway",
            descriptor.path.display()
        );
    }

    for relative in &descriptor.targets {
        let target = root.join(relative);
        if target.is_file() && normalize::normalize_in_place(&target)? {
            debug!("normalized line endings of {}", relative.display());
        }
    }

    let normalized = normalize::normalize(&descriptor.path)?;

    if let Some(reason) = git::apply_check(root, normalized.path())? {
        debug!("check failed for {}: {}", descriptor.id, reason);
        return Ok(ApplyOutcome::Failed { reason });
    }

    git::apply(root, normalized.path())?;
    debug!("applied {}", descriptor.id);
    Ok(ApplyOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use std::fs;
    use tempfile::TempDir;

    const PATCH: &str = "--- a/greeting.txt\n+++ b/greeting.txt\n@@ -1,2 +1,2 @@\n hello\n-world\n+overlay\n";

    fn catalog_with(dir: &Path, name: &str, content: &str) -> Catalog {
        fs::write(dir.join(name), content).unwrap();
        Catalog::scan(dir, ".patch").unwrap()
    }

    #[test]
    fn test_applies_clean_patch() {
        let patches = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("greeting.txt"), "hello\nworld\n").unwrap();

        let catalog = catalog_with(patches.path(), "0001-greeting.patch", PATCH);
        let outcome = apply_strict(&catalog.patches()[0], root.path()).unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(
            fs::read_to_string(root.path().join("greeting.txt")).unwrap(),
            "hello\noverlay\n"
        );
    }

    #[test]
    fn test_failed_check_leaves_tree_untouched() {
        let patches = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("greeting.txt"), "hello\nthere\n").unwrap();

        let catalog = catalog_with(patches.path(), "0001-greeting.patch", PATCH);
        let outcome = apply_strict(&catalog.patches()[0], root.path()).unwrap();

        assert!(matches!(outcome, ApplyOutcome::Failed { .. }));
        assert_eq!(
            fs::read_to_string(root.path().join("greeting.txt")).unwrap(),
            "hello\nthere\n"
        );
    }

    #[test]
    fn test_crlf_patch_and_target_are_normalized() {
        let patches = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("greeting.txt"), "hello\r\nworld\r\n").unwrap();

        let crlf = PATCH.replace('\n', "\r\n");
        let catalog = catalog_with(patches.path(), "0001-greeting.patch", &crlf);
        let outcome = apply_strict(&catalog.patches()[0], root.path()).unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(
            fs::read_to_string(root.path().join("greeting.txt")).unwrap(),
            "hello\noverlay\n"
        );
        assert_eq!(
            fs::read_to_string(patches.path().join("0001-greeting.patch")).unwrap(),
            crlf
        );
    }

    #[test]
    fn test_every_target_of_multi_file_patch_is_normalized() {
        let patches = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a.txt"), "one\n").unwrap();
        fs::write(root.path().join("b.txt"), "two\r\n").unwrap();

        let multi = "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-one\n+uno\n\
                     --- a/b.txt\n+++ b/b.txt\n@@ -1 +1 @@\n-two\n+dos\n";
        let catalog = catalog_with(patches.path(), "0001-both.patch", multi);
        let outcome = apply_strict(&catalog.patches()[0], root.path()).unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(fs::read_to_string(root.path().join("a.txt")).unwrap(), "uno\n");
        assert_eq!(fs::read_to_string(root.path().join("b.txt")).unwrap(), "dos\n");
    }

    #[test]
    fn test_malformed_payload_is_attempted_and_fails() {
        let patches = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let catalog = catalog_with(patches.path(), "0001-notes.patch", "not a diff at all\n");

        let outcome = apply_strict(&catalog.patches()[0], root.path()).unwrap();
        assert!(!outcome.is_applied());
    }
}
