//! Override mapping list
//!
//! Override files are listed one per line:
//!
//! ```text
//! # comment
//! vllm/envs.py
//! overrides/setup.py -> setup.py
//! csrc/ops.h -> csrc/ops.h ::transform=reduction-sweep,transform=relax-arch
//! ```
//!
//! The destination defaults to the source path. Destinations are always
//! relative and never climb out of the root they are published into.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// One override file and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideMapping {
    /// Path relative to the overrides root.
    pub source: PathBuf,
    /// Path relative to the publish root.
    pub destination: PathBuf,
    /// Transforms to run on the destination, in order.
    pub transforms: Vec<String>,
    /// 1-based line number in the mapping list.
    pub line: usize,
}

/// Read and parse a mapping list file.
pub fn from_file(path: &Path) -> Result<Vec<OverrideMapping>> {
    let content = fs::read_to_string(path).map_err(|e| Error::Filesystem {
        message: format!("Failed to read mapping list '{}': {}", path.display(), e),
    })?;
    parse(&content)
}

/// Parse a mapping list.
pub fn parse(content: &str) -> Result<Vec<OverrideMapping>> {
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                None
            } else {
                Some(parse_line(line, idx + 1))
            }
        })
        .collect()
}

fn parse_line(line: &str, number: usize) -> Result<OverrideMapping> {
    let err = |message: String| Error::MappingParse {
        line: number,
        message,
    };

    let (paths, options) = match line.split_once("::") {
        Some((paths, options)) => (paths, Some(options)),
        None => (line, None),
    };

    let (source, destination) = match paths.split_once("->") {
        Some((src, dst)) => (src.trim(), dst.trim()),
        None => (paths.trim(), paths.trim()),
    };
    if source.is_empty() {
        return Err(err("empty source path".to_string()));
    }
    if destination.is_empty() {
        return Err(err("empty destination after '->'".to_string()));
    }

    let source = file_path(source).map_err(|m| err(format!("source {}", m)))?;
    let destination = file_path(destination).map_err(|m| err(format!("destination {}", m)))?;

    let mut transforms = Vec::new();
    if let Some(options) = options {
        for option in options.split(',') {
            let option = option.trim();
            match option.split_once('=') {
                Some(("transform", name)) if !name.trim().is_empty() => {
                    transforms.push(name.trim().to_string());
                }
                _ => {
                    return Err(err(format!(
                        "expected 'transform=<name>', found '{}'",
                        option
                    )))
                }
            }
        }
    }

    Ok(OverrideMapping {
        source,
        destination,
        transforms,
        line: number,
    })
}

/// Validate that a path stays under whatever root it is joined to.
///
/// `.` is accepted and names the root itself.
pub fn relative_path(raw: &str) -> std::result::Result<PathBuf, String> {
    let path = PathBuf::from(raw);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(format!("'{}' must not contain '..'", raw)),
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("'{}' must be relative", raw))
            }
        }
    }
    Ok(path)
}

/// Like [`relative_path`], but the path must name an entry below the root.
fn file_path(raw: &str) -> std::result::Result<PathBuf, String> {
    let path = relative_path(raw)?;
    if !path.components().any(|c| matches!(c, Component::Normal(_))) {
        return Err(format!("'{}' does not name a file", raw));
    }
    Ok(path)
}
