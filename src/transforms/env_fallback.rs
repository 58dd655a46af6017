//! Preference-fallback edit for renamed environment variables
//!
//! Rewrites an assignment that reads a single environment variable so that
//! it reads the new variable first and falls back to the old one:
//!
//! ```text
//! conf = readEnv("OLD_NAME", "")
//! conf = readEnv("NEW_NAME", readEnv("OLD_NAME", ""))
//! ```
//!
//! The reader function is whatever the assignment already calls
//! (`os.getenv`, `os.environ.get`, ...), and the quote style is preserved.

use std::fs;
use std::path::Path;

use regex::{Captures, Regex};

use super::TransformOutcome;
use crate::error::{Error, Result};

/// Environment variable rename to honour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFallbackOp {
    /// Variable the code currently reads.
    pub old: String,
    /// Variable that should take precedence.
    pub new: String,
}

/// Apply the edit to a single file.
pub fn apply(op: &EnvFallbackOp, path: &Path) -> Result<TransformOutcome> {
    if !path.is_file() {
        return Ok(TransformOutcome::AnchorMissing);
    }
    let content = fs::read_to_string(path).map_err(|e| Error::Filesystem {
        message: format!("Failed to read '{}': {}", path.display(), e),
    })?;

    match rewrite(op, &content)? {
        Rewrite::AlreadyPresent => Ok(TransformOutcome::Unchanged),
        Rewrite::NoAssignment => Ok(TransformOutcome::AnchorMissing),
        Rewrite::Edited(updated) => {
            fs::write(path, updated).map_err(|e| Error::Filesystem {
                message: format!("Failed to write '{}': {}", path.display(), e),
            })?;
            Ok(TransformOutcome::Changed { files: 1 })
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Rewrite {
    AlreadyPresent,
    NoAssignment,
    Edited(String),
}

fn rewrite(op: &EnvFallbackOp, content: &str) -> Result<Rewrite> {
    let double = format!("\"{}\"", op.new);
    let single = format!("'{}'", op.new);
    if content.contains(&double) || content.contains(&single) {
        return Ok(Rewrite::AlreadyPresent);
    }

    let assignment = Regex::new(&format!(
        r#"(?m)^(?P<lhs>[^\n=]*[^=!<>\n]=[ \t]*)(?P<func>[A-Za-z_][\w.]*)\([ \t]*(?P<q>["']){}["'](?P<rest>[^()\n]*(?:\([^()\n]*\)[^()\n]*)*)\)"#,
        regex::escape(&op.old)
    ))?;

    if !assignment.is_match(content) {
        return Ok(Rewrite::NoAssignment);
    }

    let updated = assignment.replace_all(content, |caps: &Captures| {
        let q = &caps["q"];
        format!(
            "{lhs}{func}({q}{new}{q}, {func}({q}{old}{q}{rest}))",
            lhs = &caps["lhs"],
            func = &caps["func"],
            q = q,
            new = op.new,
            old = op.old,
            rest = &caps["rest"],
        )
    });
    Ok(Rewrite::Edited(updated.into_owned()))
}
