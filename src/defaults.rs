//! Default values for overlay-patch configuration.
//!
//! This module provides centralized default values used by the configuration
//! loader and the CLI, ensuring consistency and avoiding duplication.

use std::path::PathBuf;

/// Name of the configuration file looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = ".overlay-patch.yaml";

/// File name suffix identifying patch catalog entries.
pub const PATCH_SUFFIX: &str = ".patch";

/// Default number of paths listed by a dirty-tree warning.
pub const GUARD_LISTING_CAP: usize = 20;

/// Name of the search-path marker file written on publish.
pub const SEARCH_PATH_MARKER: &str = "overlay-patch.pth";

/// Stamp file identifying a directory as an overlay root owned by this tool.
pub const OVERLAY_STAMP: &str = ".overlay-patch-root";

/// Top-level files, any one of which marks a mirrored tree as buildable.
pub fn build_markers() -> Vec<String> {
    ["setup.py", "pyproject.toml", "CMakeLists.txt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Returns the default overlay root directory.
///
/// Uses the platform-appropriate cache directory:
/// - Linux: `~/.cache/overlay-patch/overlay` (XDG Base Directory)
/// - macOS: `~/Library/Caches/overlay-patch/overlay`
/// - Windows: `{FOLDERID_LocalAppData}\overlay-patch\overlay`
///
/// Falls back to `.overlay-patch-cache/overlay` in the current directory if
/// the platform cache directory cannot be determined.
pub fn default_overlay_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".overlay-patch-cache"))
        .join("overlay-patch")
        .join("overlay")
}
