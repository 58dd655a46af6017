//! Assertion-relaxation edit
//!
//! Removes a multi-line guard block identified by distinctive head and tail
//! anchor text. The span between the anchors is matched non-greedily, so two
//! consecutive blocks are removed separately rather than swallowing the code
//! between them. A file without the head anchor is left alone.

use std::fs;
use std::path::Path;

use log::debug;
use regex::Regex;

use super::TransformOutcome;
use crate::error::{Error, Result};

/// Anchors delimiting the block to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardBlockOp {
    /// Text the block starts with.
    pub head: String,
    /// Text the block ends with.
    pub tail: String,
}

impl GuardBlockOp {
    fn pattern(&self) -> Result<Regex> {
        // Leading indentation and the newline after the tail go with the block.
        Ok(Regex::new(&format!(
            r"(?ms)(?:^[ \t]*)?{}.*?{}[ \t]*\n?",
            regex::escape(&self.head),
            regex::escape(&self.tail)
        ))?)
    }
}

/// Remove every guard block from one file.
pub fn apply(op: &GuardBlockOp, path: &Path) -> Result<TransformOutcome> {
    if !path.is_file() {
        debug!("guard block target {} does not exist", path.display());
        return Ok(TransformOutcome::Unchanged);
    }
    let content = fs::read_to_string(path).map_err(|e| Error::Filesystem {
        message: format!("Failed to read '{}': {}", path.display(), e),
    })?;

    match remove_blocks(op, &content)? {
        Some(updated) => {
            fs::write(path, updated).map_err(|e| Error::Filesystem {
                message: format!("Failed to write '{}': {}", path.display(), e),
            })?;
            Ok(TransformOutcome::Changed { files: 1 })
        }
        None => {
            debug!("guard block anchors not found in {}", path.display());
            Ok(TransformOutcome::Unchanged)
        }
    }
}

fn remove_blocks(op: &GuardBlockOp, content: &str) -> Result<Option<String>> {
    if !content.contains(&op.head) {
        return Ok(None);
    }
    let pattern = op.pattern()?;
    let updated = pattern.replace_all(content, "");
    if updated == content {
        Ok(None)
    } else {
        Ok(Some(updated.into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn op() -> GuardBlockOp {
        GuardBlockOp {
            head: "assert capability >= (9, 0), (".to_string(),
            tail: "\"is not supported\")".to_string(),
        }
    }

    const GUARDED: &str = "def check():\n    x = 1\n    assert capability >= (9, 0), (\n        \"this architecture \"\n        \"is not supported\")\n    return x\n";

    #[test]
    fn test_removes_block_between_anchors() {
        let result = remove_blocks(&op(), GUARDED).unwrap().unwrap();
        assert_eq!(result, "def check():\n    x = 1\n    return x\n");
    }

    #[test]
    fn test_removal_is_idempotent() {
        let once = remove_blocks(&op(), GUARDED).unwrap().unwrap();
        assert_eq!(remove_blocks(&op(), &once).unwrap(), None);
    }

    #[test]
    fn test_non_greedy_span_keeps_code_between_blocks() {
        let op = GuardBlockOp {
            head: "# guard-begin".to_string(),
            tail: "# guard-end".to_string(),
        };
        let source = "# guard-begin\na\n# guard-end\nkeep()\n# guard-begin\nb\n# guard-end\n";
        let result = remove_blocks(&op, source).unwrap().unwrap();
        assert_eq!(result, "keep()\n");
    }

    #[test]
    fn test_missing_anchor_is_silent_no_op() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("checks.py");
        fs::write(&path, "print('nothing to relax')\n").unwrap();

        assert_eq!(apply(&op(), &path).unwrap(), TransformOutcome::Unchanged);
        assert_eq!(
            apply(&op(), &temp.path().join("absent.py")).unwrap(),
            TransformOutcome::Unchanged
        );
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "print('nothing to relax')\n"
        );
    }
}
