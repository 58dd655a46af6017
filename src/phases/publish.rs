//! Overlay Publishing
//!
//! Copies override files onto a tree and runs the transforms named on their
//! mapping lines. There are two targets:
//!
//! - **Overlay**: the files land under the overlay root only. The overlay is
//!   then registered on the runtime search path. The caller owns the guard
//!   check, since the checkout is never written here.
//! - **Direct**: the files land on the live checkout for the duration of a
//!   downstream step. Every destination is recorded first, restored after
//!   the step (or when the session is dropped on an error path), and the
//!   guard then runs in enforce mode.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::git;
use crate::mapping::OverrideMapping;
use crate::phases::guard::{self, GuardMode, GuardReport, Snapshot};
use crate::transforms::{TransformOutcome, TransformRegistry};

/// Where override files are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    /// Into a materialized overlay root.
    Overlay(PathBuf),
    /// Transiently onto the live checkout.
    Direct,
}

/// What a publish pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
    /// Destinations written, relative to the publish root.
    pub published: Vec<PathBuf>,
    /// `transform on destination` entries whose anchor was missing.
    pub anchor_missing: Vec<String>,
    /// Search-path marker written, if registration is configured.
    pub registration: Option<PathBuf>,
    /// Guard result for the checkout after a direct pass.
    pub guard: Option<GuardReport>,
}

impl PublishReport {
    /// Number of override files published
    pub fn published_count(&self) -> usize {
        self.published.len()
    }
}

/// Publish to either target.
///
/// `downstream` receives the published tree root. In overlay mode it runs
/// after registration; in direct mode it runs while the overrides are in
/// place, before they are restored.
pub fn publish<F>(
    mappings: &[OverrideMapping],
    target: &PublishTarget,
    registry: &TransformRegistry,
    config: &EngineConfig,
    downstream: F,
) -> Result<PublishReport>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let mut report = PublishReport::default();
    publish_into(mappings, target, registry, config, downstream, &mut report)?;
    Ok(report)
}

/// Like [`publish`], recording progress in `report` as it goes.
///
/// On error, `report` holds everything published before the failure.
pub fn publish_into<F>(
    mappings: &[OverrideMapping],
    target: &PublishTarget,
    registry: &TransformRegistry,
    config: &EngineConfig,
    downstream: F,
    report: &mut PublishReport,
) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    match target {
        PublishTarget::Overlay(root) => {
            overlay_into(mappings, root, registry, config, report)?;
            downstream(root)
        }
        PublishTarget::Direct => direct_into(mappings, registry, config, downstream, report),
    }
}

/// Publish into an overlay root and register it on the search path.
pub fn publish_overlay(
    mappings: &[OverrideMapping],
    overlay_root: &Path,
    registry: &TransformRegistry,
    config: &EngineConfig,
) -> Result<PublishReport> {
    let mut report = PublishReport::default();
    overlay_into(mappings, overlay_root, registry, config, &mut report)?;
    Ok(report)
}

fn overlay_into(
    mappings: &[OverrideMapping],
    overlay_root: &Path,
    registry: &TransformRegistry,
    config: &EngineConfig,
    report: &mut PublishReport,
) -> Result<()> {
    validate(mappings, &config.overrides_root, registry)?;

    for mapping in mappings {
        copy_override(&config.overrides_root, overlay_root, mapping)?;
        run_transforms(mapping, overlay_root, registry, report)?;
    }

    if let Some(dir) = &config.search_path_dir {
        report.registration = Some(register_search_path(
            dir,
            &config.search_path_marker,
            overlay_root,
        )?);
    }

    info!(
        "Published {} override(s) into {}",
        report.published_count(),
        overlay_root.display()
    );
    Ok(())
}

/// Publish onto the live checkout around a downstream step.
///
/// Tracked destinations that matched `HEAD` are restored with git, every
/// other pre-existing destination from an in-memory copy, and created ones
/// are removed. A dirty guard result afterwards is a `DirtyTree` error.
pub fn publish_direct<F>(
    mappings: &[OverrideMapping],
    registry: &TransformRegistry,
    config: &EngineConfig,
    downstream: F,
) -> Result<PublishReport>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let mut report = PublishReport::default();
    direct_into(mappings, registry, config, downstream, &mut report)?;
    Ok(report)
}

fn direct_into<F>(
    mappings: &[OverrideMapping],
    registry: &TransformRegistry,
    config: &EngineConfig,
    downstream: F,
    report: &mut PublishReport,
) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let root = &config.source_root;
    validate(mappings, &config.overrides_root, registry)?;
    let before = Snapshot::capture(root)?;

    let mut session = DirectSession::new(root)?;
    for mapping in mappings {
        session.track(&mapping.destination)?;
        copy_override(&config.overrides_root, root, mapping)?;
        run_transforms(mapping, root, registry, report)?;
    }
    info!(
        "Published {} override(s) onto {} for the downstream step",
        report.published_count(),
        root.display()
    );

    let outcome = downstream(root);
    session.restore()?;
    outcome?;

    let guard = guard::check_since(&before)?;
    report.guard = Some(guard.clone());
    guard::enforce(&guard, GuardMode::Enforce, config.guard_listing_cap)
}

/// Fail before writing anything if a source is missing or a transform unknown.
fn validate(
    mappings: &[OverrideMapping],
    overrides_root: &Path,
    registry: &TransformRegistry,
) -> Result<()> {
    for mapping in mappings {
        let source = overrides_root.join(&mapping.source);
        if !source.is_file() {
            return Err(Error::Filesystem {
                message: format!(
                    "Override source '{}' (line {}) does not exist",
                    source.display(),
                    mapping.line
                ),
            });
        }
        for name in &mapping.transforms {
            if registry.get(name).is_none() {
                return Err(Error::UnknownTransform { name: name.clone() });
            }
        }
    }
    Ok(())
}

fn copy_override(overrides_root: &Path, root: &Path, mapping: &OverrideMapping) -> Result<()> {
    let source = overrides_root.join(&mapping.source);
    let dest = root.join(&mapping.destination);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::Filesystem {
            message: format!("Failed to create directory '{}': {}", parent.display(), e),
        })?;
    }
    fs::copy(&source, &dest).map_err(|e| Error::Filesystem {
        message: format!(
            "Failed to copy '{}' to '{}': {}",
            source.display(),
            dest.display(),
            e
        ),
    })?;
    debug!(
        "{} -> {}",
        mapping.source.display(),
        mapping.destination.display()
    );
    Ok(())
}

fn run_transforms(
    mapping: &OverrideMapping,
    root: &Path,
    registry: &TransformRegistry,
    report: &mut PublishReport,
) -> Result<()> {
    for name in &mapping.transforms {
        if registry.run_on(name, root, &mapping.destination)? == TransformOutcome::AnchorMissing {
            warn!(
                "Transform '{}' found no anchor in {}",
                name,
                mapping.destination.display()
            );
            report
                .anchor_missing
                .push(format!("{} on {}", name, mapping.destination.display()));
        }
    }
    report.published.push(mapping.destination.clone());
    Ok(())
}

/// Write the search-path marker naming `overlay_root`.
///
/// The marker holds the absolute overlay path followed by a newline.
pub fn register_search_path(dir: &Path, marker: &str, overlay_root: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| Error::Filesystem {
        message: format!("Failed to create search-path dir '{}': {}", dir.display(), e),
    })?;
    let absolute = overlay_root.canonicalize().map_err(|e| Error::Path {
        message: format!("Failed to resolve '{}': {}", overlay_root.display(), e),
    })?;
    let path = dir.join(marker);
    fs::write(&path, format!("{}\n", absolute.display()))?;
    debug!("registered {} in {}", absolute.display(), path.display());
    Ok(path)
}

/// Remove the search-path marker. Returns whether one was present.
pub fn unregister_search_path(dir: &Path, marker: &str) -> Result<bool> {
    let path = dir.join(marker);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path)?;
    Ok(true)
}

/// Everything direct publishing changed on the checkout.
struct DirectSession {
    root: PathBuf,
    tracked: Vec<PathBuf>,
    /// Tracked paths with uncommitted edits when the session started.
    dirty: Vec<PathBuf>,
    backups: Vec<(PathBuf, Vec<u8>)>,
    created_files: Vec<PathBuf>,
    created_dirs: Vec<PathBuf>,
    git: bool,
    restored: bool,
}

impl DirectSession {
    fn new(root: &Path) -> Result<Self> {
        let git = git::is_work_tree(root);
        let dirty = if git {
            git::modified_tracked(root)?
        } else {
            Vec::new()
        };
        Ok(Self {
            root: root.to_path_buf(),
            tracked: Vec::new(),
            dirty,
            backups: Vec::new(),
            created_files: Vec::new(),
            created_dirs: Vec::new(),
            git,
            restored: false,
        })
    }

    fn restorable_from_head(&self, destination: &Path) -> Result<bool> {
        if !self.git || self.dirty.iter().any(|p| p == destination) {
            return Ok(false);
        }
        git::is_tracked(&self.root, destination)
    }

    /// Record how to undo a write to `destination`.
    fn track(&mut self, destination: &Path) -> Result<()> {
        let full = self.root.join(destination);
        let seen = self.tracked.iter().any(|p| p == destination)
            || self.backups.iter().any(|(p, _)| *p == full)
            || self.created_files.contains(&full);
        if seen {
            return Ok(());
        }

        if full.exists() {
            if self.restorable_from_head(destination)? {
                self.tracked.push(destination.to_path_buf());
            } else {
                let content = fs::read(&full)?;
                self.backups.push((full, content));
            }
            return Ok(());
        }

        if let Some(parent) = full.parent() {
            for dir in parent.ancestors() {
                if dir.exists() || !dir.starts_with(&self.root) {
                    break;
                }
                self.created_dirs.push(dir.to_path_buf());
            }
        }
        self.created_files.push(full);
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;

        git::restore(&self.root, &self.tracked)?;
        for (path, content) in &self.backups {
            fs::write(path, content)?;
        }
        for file in &self.created_files {
            if file.exists() {
                fs::remove_file(file)?;
            }
        }
        for dir in &self.created_dirs {
            if let Err(e) = fs::remove_dir(dir) {
                debug!("left {} in place: {}", dir.display(), e);
            }
        }
        debug!(
            "restored {} from HEAD, {} from backup, removed {} created file(s)",
            self.tracked.len(),
            self.backups.len(),
            self.created_files.len()
        );
        Ok(())
    }
}

impl Drop for DirectSession {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("Failed to restore {}: {}", self.root.display(), e);
        }
    }
}
