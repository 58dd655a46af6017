//! Overlay Materialization
//!
//! Builds a patched, build-ready copy of the source tree in a disposable
//! overlay root. The pristine checkout is only ever read.
//!
//! ## Process
//!
//! 1.  **Claim the root**: The overlay root must differ from the checkout and
//!     must not contain it. An existing directory is reused only if it is
//!     empty or carries the overlay stamp; its contents are always cleared.
//!
//! 2.  **Mirror**: The checkout is copied with `walkdir`, skipping VCS
//!     metadata, virtual environments, caches, prior build output and the
//!     overlay root itself. Symlinks are recreated and permissions kept.
//!
//! 3.  **Apply the catalog**: Every patch is tried strictly, in catalog order.
//!     A patch that does not apply falls back to its bound transform, if any.
//!     Failures are recorded per patch and never stop the loop.
//!
//! 4.  **Sweep**: Registered sweep transforms run over the mirror.
//!
//! 5.  **Validate**: At least one build marker must exist at the top of the
//!     overlay, otherwise the mirror is treated as failed.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;
use walkdir::{DirEntry, WalkDir};

use crate::apply::{self, ApplyOutcome};
use crate::catalog::{Catalog, PatchDescriptor};
use crate::config::EngineConfig;
use crate::defaults;
use crate::error::{Error, Result};
use crate::transforms::{self, TransformOutcome, TransformRegistry};

/// Directory names never mirrored.
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "venv",
    ".venv",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".tox",
];

/// Build output directories, excluded only at the top of the tree.
const EXCLUDED_OUTPUT_DIRS: &[&str] = &["build", "dist"];

/// How a single catalog entry was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum PatchStatus {
    /// Applied strictly.
    Applied,
    /// Strict application failed; the bound transform produced the effect.
    Fallback { transform: String },
    /// Strict application failed and no fallback is registered.
    Failed { reason: String },
    /// The bound fallback could not find its anchor.
    AnchorMissing { transform: String },
    /// Not attempted.
    Skipped { reason: String },
}

/// Per-patch result recorded in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchOutcome {
    pub id: String,
    pub ordinal: usize,
    #[serde(flatten)]
    pub status: PatchStatus,
}

impl PatchOutcome {
    /// Whether the patch's effect is present in the tree.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.status,
            PatchStatus::Applied | PatchStatus::Fallback { .. }
        )
    }

    /// The local error this outcome stands for, if it is a failure.
    pub fn to_error(&self) -> Option<Error> {
        match &self.status {
            PatchStatus::Failed { reason } => Some(Error::PatchApplication {
                patch: self.id.clone(),
                message: reason.clone(),
            }),
            PatchStatus::AnchorMissing { transform } => Some(Error::TransformAnchorMissing {
                transform: transform.clone(),
                target: self.id.clone(),
            }),
            _ => None,
        }
    }
}

/// Result of one sweep transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    pub name: String,
    #[serde(flatten)]
    pub outcome: TransformOutcome,
}

/// A materialized overlay and what happened while building it.
#[derive(Debug, Clone)]
pub struct PreparedOverlay {
    pub root: PathBuf,
    pub outcomes: Vec<PatchOutcome>,
    pub sweeps: Vec<SweepOutcome>,
}

impl PreparedOverlay {
    /// Whether every catalog entry resolved
    pub fn all_resolved(&self) -> bool {
        self.outcomes.iter().all(PatchOutcome::is_resolved)
    }
}

/// Materialize the overlay at the root selected by `config`.
pub fn prepare(
    config: &EngineConfig,
    catalog: &Catalog,
    registry: &TransformRegistry,
) -> Result<PreparedOverlay> {
    let root = config.overlay_root().ok_or_else(|| Error::Path {
        message: "Overlay mode is disabled; there is no overlay root to prepare".to_string(),
    })?;
    prepare_at(config, &root, catalog, registry)
}

/// Materialize the overlay at an explicit root.
pub fn prepare_at(
    config: &EngineConfig,
    overlay_root: &Path,
    catalog: &Catalog,
    registry: &TransformRegistry,
) -> Result<PreparedOverlay> {
    let root = mirror_source(config, overlay_root)?;
    let outcomes = apply_catalog(&root, catalog, registry)?;
    let sweeps = run_sweeps(&root, registry)?;
    validate_markers(&root, &config.build_markers)?;

    Ok(PreparedOverlay {
        root,
        outcomes,
        sweeps,
    })
}

/// Claim `overlay_root` and mirror the checkout into it.
///
/// Returns the canonical overlay root.
pub fn mirror_source(config: &EngineConfig, overlay_root: &Path) -> Result<PathBuf> {
    let (source, root) = claim_root(&config.source_root, overlay_root)?;
    info!("Mirroring {} into {}", source.display(), root.display());

    let filter = MirrorFilter::new(&source, &root, &config.exclude)?;
    let copied = mirror(&source, &root, &filter)?;
    debug!("mirrored {} entries", copied);
    Ok(root)
}

/// Run every registered sweep over `root`.
pub fn run_sweeps(root: &Path, registry: &TransformRegistry) -> Result<Vec<SweepOutcome>> {
    let mut sweeps = Vec::new();
    for sweep in registry.sweeps() {
        let outcome = transforms::apply(sweep, root, &sweep.target)?;
        if outcome == TransformOutcome::AnchorMissing {
            warn!(
                "Sweep '{}' found nothing at {}",
                sweep.name,
                sweep.target.display()
            );
        }
        sweeps.push(SweepOutcome {
            name: sweep.name.clone(),
            outcome,
        });
    }
    Ok(sweeps)
}

/// Apply every catalog entry, in order, to `root`.
///
/// Per-patch failures are recorded and the loop continues; only errors that
/// make the tree itself unusable are returned.
pub fn apply_catalog(
    root: &Path,
    catalog: &Catalog,
    registry: &TransformRegistry,
) -> Result<Vec<PatchOutcome>> {
    let mut outcomes = Vec::with_capacity(catalog.len());
    for descriptor in catalog.patches() {
        let status = resolve_patch(root, descriptor, registry)?;
        match &status {
            PatchStatus::Applied => info!("Applied {}", descriptor.id),
            PatchStatus::Fallback { transform } => {
                info!("Resolved {} via transform '{}'", descriptor.id, transform)
            }
            PatchStatus::Failed { reason } => warn!("Failed {}: {}", descriptor.id, reason),
            PatchStatus::AnchorMissing { transform } => warn!(
                "Fallback '{}' for {} found no anchor",
                transform, descriptor.id
            ),
            PatchStatus::Skipped { .. } => {}
        }
        outcomes.push(PatchOutcome {
            id: descriptor.id.clone(),
            ordinal: descriptor.ordinal,
            status,
        });
    }
    Ok(outcomes)
}

fn resolve_patch(
    root: &Path,
    descriptor: &PatchDescriptor,
    registry: &TransformRegistry,
) -> Result<PatchStatus> {
    let reason = match apply::apply_strict(descriptor, root)? {
        ApplyOutcome::Applied => return Ok(PatchStatus::Applied),
        ApplyOutcome::Failed { reason } => reason,
    };

    let Some(fallback) = registry.fallback_for(&descriptor.id) else {
        return Ok(PatchStatus::Failed { reason });
    };
    debug!(
        "{} did not apply ({}); running fallback '{}'",
        descriptor.id, reason, fallback.name
    );
    let transform = fallback.name.clone();
    Ok(
        match transforms::apply(fallback, root, &fallback.target)? {
            TransformOutcome::AnchorMissing => PatchStatus::AnchorMissing { transform },
            TransformOutcome::Changed { .. } | TransformOutcome::Unchanged => {
                PatchStatus::Fallback { transform }
            }
        },
    )
}

/// Outcomes for a catalog that is deliberately not applied.
pub fn skip_catalog(catalog: &Catalog, reason: &str) -> Vec<PatchOutcome> {
    catalog
        .patches()
        .iter()
        .map(|descriptor| PatchOutcome {
            id: descriptor.id.clone(),
            ordinal: descriptor.ordinal,
            status: PatchStatus::Skipped {
                reason: reason.to_string(),
            },
        })
        .collect()
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| Error::Path {
        message: format!("Failed to resolve '{}': {}", path.display(), e),
    })
}

/// Validate and reset the overlay root, returning canonical source and root.
fn claim_root(source_root: &Path, overlay_root: &Path) -> Result<(PathBuf, PathBuf)> {
    let source = canonical(source_root)?;
    let integrity = |message: String| Error::OverlayIntegrity {
        root: overlay_root.display().to_string(),
        message,
    };

    if overlay_root.exists() && !overlay_root.is_dir() {
        return Err(integrity("overlay root exists and is not a directory".to_string()));
    }
    if !overlay_root.exists() {
        fs::create_dir_all(overlay_root).map_err(|e| Error::Filesystem {
            message: format!(
                "Failed to create overlay root '{}': {}",
                overlay_root.display(),
                e
            ),
        })?;
    }
    let root = canonical(overlay_root)?;

    if source.starts_with(&root) {
        return Err(integrity(format!(
            "overlay root must not be the source checkout {} or contain it",
            source.display()
        )));
    }

    let stamp = root.join(defaults::OVERLAY_STAMP);
    let mut entries = fs::read_dir(&root)?.peekable();
    if entries.peek().is_some() && !stamp.is_file() {
        return Err(integrity(format!(
            "refusing to reuse a non-empty directory without the {} stamp",
            defaults::OVERLAY_STAMP
        )));
    }
    for entry in entries {
        let path = entry?.path();
        let file_type = fs::symlink_metadata(&path)?.file_type();
        if file_type.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    fs::write(&stamp, format!("{}\n", source.display()))?;
    Ok((source, root))
}

/// Decides which entries of the source tree are mirrored.
struct MirrorFilter {
    source: PathBuf,
    overlay: PathBuf,
    patterns: Vec<glob::Pattern>,
}

impl MirrorFilter {
    fn new(source: &Path, overlay: &Path, exclude: &[String]) -> Result<Self> {
        let patterns = exclude
            .iter()
            .map(|p| glob::Pattern::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            source: source.to_path_buf(),
            overlay: overlay.to_path_buf(),
            patterns,
        })
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        let is_dir = entry.file_type().is_dir();

        if EXCLUDED_DIRS.contains(&&*name) {
            return true;
        }
        if is_dir {
            if entry.depth() == 1 && EXCLUDED_OUTPUT_DIRS.contains(&&*name) {
                return true;
            }
            if name.ends_with(".egg-info") || entry.path().join("pyvenv.cfg").is_file() {
                return true;
            }
            if entry.path() == self.overlay {
                return true;
            }
        } else if name.ends_with(".pyc") {
            return true;
        }

        let relative = entry
            .path()
            .strip_prefix(&self.source)
            .unwrap_or(entry.path());
        self.patterns.iter().any(|p| p.matches_path(relative))
    }
}

/// Copy the filtered source tree into `root`, returning the entry count.
fn mirror(source: &Path, root: &Path, filter: &MirrorFilter) -> Result<usize> {
    let mut count = 0;
    let mut directories = Vec::new();

    for entry in WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !filter.is_excluded(e))
    {
        let entry = entry.map_err(|e| Error::Filesystem {
            message: format!("Failed to walk '{}': {}", source.display(), e),
        })?;
        if entry.depth() == 0 {
            continue;
        }
        let relative = entry.path().strip_prefix(source).map_err(|e| Error::Path {
            message: format!("'{}' is outside the source root: {}", entry.path().display(), e),
        })?;
        let dest = root.join(relative);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            copy_symlink(entry.path(), &dest)?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
            directories.push((dest, entry.metadata().map_err(walk_error)?.permissions()));
        } else {
            fs::copy(entry.path(), &dest).map_err(|e| Error::Filesystem {
                message: format!("Failed to copy '{}': {}", relative.display(), e),
            })?;
        }
        count += 1;
    }

    // Children first, so a read-only directory does not block its contents.
    for (dir, permissions) in directories.into_iter().rev() {
        fs::set_permissions(&dir, permissions)?;
    }
    Ok(count)
}

fn walk_error(e: walkdir::Error) -> Error {
    Error::Filesystem {
        message: e.to_string(),
    }
}

#[cfg(unix)]
fn copy_symlink(link: &Path, dest: &Path) -> Result<()> {
    let target = fs::read_link(link)?;
    std::os::unix::fs::symlink(&target, dest).map_err(|e| Error::Filesystem {
        message: format!(
            "Failed to recreate symlink '{}' -> '{}': {}",
            dest.display(),
            target.display(),
            e
        ),
    })
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, dest: &Path) -> Result<()> {
    if link.is_file() {
        fs::copy(link, dest)?;
    }
    Ok(())
}

/// Require at least one build marker at the top of `root`.
pub fn validate_markers(root: &Path, markers: &[String]) -> Result<()> {
    if markers.iter().any(|m| root.join(m).is_file()) {
        return Ok(());
    }
    Err(Error::OverlayIntegrity {
        root: root.display().to_string(),
        message: format!("none of the build markers exist: {}", markers.join(", ")),
    })
}
