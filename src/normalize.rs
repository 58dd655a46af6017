//! Line-ending normalization
//!
//! Host mounts and editors on other platforms may inject CRLF line endings
//! into patches or target files, which makes strict diff application fail
//! for reasons unrelated to content. Every patch is therefore copied into a
//! temporary file with the carriage return of each CRLF pair removed before
//! it is attempted.
//!
//! The original file is never opened for writing by [`normalize`]. Content
//! that cannot be stripped (binary data, unreadable input) is copied
//! verbatim instead.

use std::fs;
use std::io::Write;
use std::path::Path;

use log::{debug, warn};
use tempfile::{NamedTempFile, TempPath};

use crate::error::{Error, Result};

/// How many leading bytes are inspected for NUL when detecting binary data.
const BINARY_PROBE_LEN: usize = 8 * 1024;

/// A normalized copy of a file, deleted when dropped.
#[derive(Debug)]
pub struct NormalizedFile {
    path: TempPath,
    stripped: usize,
}

impl NormalizedFile {
    /// Location of the normalized copy
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of carriage-return bytes removed.
    pub fn stripped(&self) -> usize {
        self.stripped
    }
}

/// Whether content looks binary (contains a NUL byte near the start).
pub fn is_binary(content: &[u8]) -> bool {
    content.iter().take(BINARY_PROBE_LEN).any(|&b| b == 0)
}

/// Remove the carriage return of every CRLF pair.
///
/// Lone carriage returns are kept, so the output differs from the input
/// only by the removed bytes.
pub fn strip_crlf(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len());
    let mut iter = content.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

/// Copy `path` into a new temporary file with CRLF line endings normalized.
pub fn normalize(path: &Path) -> Result<NormalizedFile> {
    let mut temp = tempfile::Builder::new()
        .prefix("overlay-patch-")
        .suffix(".normalized")
        .tempfile()?;

    let stripped = match fs::read(path) {
        Ok(content) if !is_binary(&content) => {
            let normalized = strip_crlf(&content);
            let removed = content.len() - normalized.len();
            write_all(&mut temp, &normalized, path)?;
            removed
        }
        Ok(content) => {
            debug!("{} looks binary, copying verbatim", path.display());
            write_all(&mut temp, &content, path)?;
            0
        }
        Err(e) => {
            warn!(
                "Could not read {} for normalization ({}), copying verbatim",
                path.display(),
                e
            );
            fs::copy(path, temp.path()).map_err(|e| Error::Filesystem {
                message: format!("Failed to copy '{}': {}", path.display(), e),
            })?;
            0
        }
    };

    if stripped > 0 {
        debug!(
            "stripped {} carriage returns from {}",
            stripped,
            path.display()
        );
    }

    Ok(NormalizedFile {
        path: temp.into_temp_path(),
        stripped,
    })
}

/// Normalize a file in place. Only for files inside an overlay root.
///
/// Returns whether the file was rewritten.
pub fn normalize_in_place(path: &Path) -> Result<bool> {
    let content = fs::read(path)?;
    if is_binary(&content) {
        return Ok(false);
    }
    let normalized = strip_crlf(&content);
    if normalized.len() == content.len() {
        return Ok(false);
    }
    fs::write(path, normalized).map_err(|e| Error::Filesystem {
        message: format!("Failed to write '{}': {}", path.display(), e),
    })?;
    Ok(true)
}

fn write_all(temp: &mut NamedTempFile, content: &[u8], source: &Path) -> Result<()> {
    temp.write_all(content)
        .and_then(|_| temp.flush())
        .map_err(|e| Error::Filesystem {
            message: format!(
                "Failed to write normalized copy of '{}': {}",
                source.display(),
                e
            ),
        })
}
