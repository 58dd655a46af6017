//! Patch catalog
//!
//! The catalog is a directory of unified-diff files. Files are applied in
//! lexical filename order, so numeric prefixes (`0001-`, `02-`) are the
//! ordering protocol. The order never depends on the order in which the
//! filesystem happens to list the directory.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// One patch file of the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchDescriptor {
    /// File name without the catalog suffix. Unique per catalog.
    pub id: String,
    /// Position in application order, starting at zero.
    pub ordinal: usize,
    /// Location of the patch file.
    pub path: PathBuf,
    /// Raw diff payload as read from disk.
    pub payload: Vec<u8>,
    /// First file the diff touches, relative to the tree root.
    pub target_hint: Option<PathBuf>,
    /// Every file the diff touches, in header order.
    pub targets: Vec<PathBuf>,
}

impl PatchDescriptor {
    /// Whether the payload has the headers of a unified diff.
    ///
    /// Requires either a `diff --git` line or a `---`/`+++` header pair, and
    /// at least one `@@` hunk header.
    pub fn looks_like_unified_diff(&self) -> bool {
        let text = String::from_utf8_lossy(&self.payload);
        let mut has_git_header = false;
        let mut has_old = false;
        let mut has_pair = false;
        let mut has_hunk = false;
        for line in text.lines() {
            if line.starts_with("diff --git ") {
                has_git_header = true;
            } else if line.starts_with("--- ") {
                has_old = true;
            } else if line.starts_with("+++ ") && has_old {
                has_pair = true;
            } else if line.starts_with("@@") {
                has_hunk = true;
            }
        }
        (has_git_header || has_pair) && has_hunk
    }
}

/// Ordered set of patch descriptors.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    patches: Vec<PatchDescriptor>,
}

impl Catalog {
    /// Scan `dir` for files ending in `suffix`.
    ///
    /// A missing directory yields an empty catalog.
    pub fn scan(dir: &Path, suffix: &str) -> Result<Self> {
        if !dir.exists() {
            return Ok(Self::default());
        }
        if !dir.is_dir() {
            return Err(Error::Catalog {
                message: format!("'{}' is not a directory", dir.display()),
            });
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| Error::Catalog {
            message: format!("Failed to read '{}': {}", dir.display(), e),
        })? {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        Self::from_paths(paths, suffix)
    }

    /// Build a catalog from file paths in any order.
    ///
    /// Paths not ending in `suffix` are ignored.
    pub fn from_paths(paths: Vec<PathBuf>, suffix: &str) -> Result<Self> {
        let mut named: Vec<(String, PathBuf)> = paths
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?.to_string();
                if name.len() > suffix.len() && name.ends_with(suffix) {
                    Some((name, path))
                } else {
                    None
                }
            })
            .collect();
        named.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        let mut seen = HashSet::new();
        let mut patches = Vec::with_capacity(named.len());
        for (ordinal, (name, path)) in named.into_iter().enumerate() {
            let id = name[..name.len() - suffix.len()].to_string();
            if !seen.insert(id.clone()) {
                return Err(Error::Catalog {
                    message: format!("Duplicate patch id '{}'", id),
                });
            }
            let payload = fs::read(&path).map_err(|e| Error::Catalog {
                message: format!("Failed to read '{}': {}", path.display(), e),
            })?;
            let target_hint = target_hint(&payload);
            let targets = target_paths(&payload);
            patches.push(PatchDescriptor {
                id,
                ordinal,
                path,
                payload,
                target_hint,
                targets,
            });
        }
        Ok(Self { patches })
    }

    /// Patches in application order
    pub fn patches(&self) -> &[PatchDescriptor] {
        &self.patches
    }

    /// Look up a patch by id
    pub fn get(&self, id: &str) -> Option<&PatchDescriptor> {
        self.patches.iter().find(|p| p.id == id)
    }

    /// Number of patches
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Whether the catalog has no patches
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

/// First path named by the diff headers, with its `a/` or `b/` prefix removed.
pub fn target_hint(payload: &[u8]) -> Option<PathBuf> {
    let text = String::from_utf8_lossy(payload);
    let header_path = |prefix: &str| {
        text.lines()
            .filter_map(|line| line.strip_prefix(prefix))
            .map(|rest| rest.split('\t').next().unwrap_or(rest).trim())
            .find(|p| *p != "/dev/null" && !p.is_empty())
            .map(strip_component)
    };
    header_path("+++ ").or_else(|| header_path("--- "))
}

/// Every distinct path named by a `---`/`+++` header pair.
///
/// `/dev/null` sides are skipped, so created and deleted files contribute
/// their one real path.
pub fn target_paths(payload: &[u8]) -> Vec<PathBuf> {
    let text = String::from_utf8_lossy(payload);
    let lines: Vec<&str> = text.lines().collect();
    let mut paths = Vec::new();
    for pair in lines.windows(2) {
        let (Some(old), Some(new)) = (pair[0].strip_prefix("--- "), pair[1].strip_prefix("+++ "))
        else {
            continue;
        };
        for side in [old, new] {
            let side = side.split('\t').next().unwrap_or(side).trim();
            if side == "/dev/null" || side.is_empty() {
                continue;
            }
            let path = strip_component(side);
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    paths
}

fn strip_component(path: &str) -> PathBuf {
    match path.split_once('/') {
        Some((_, rest)) if !rest.is_empty() => PathBuf::from(rest),
        _ => PathBuf::from(path),
    }
}
