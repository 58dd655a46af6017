//! Orchestrator for the overlay pipeline.
//!
//! Runs the whole flow for one invocation: scan the catalog, read the
//! override mapping list, then either materialize and publish into an
//! overlay root or publish directly onto the checkout, and finally hand the
//! resulting tree to the downstream step.

use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::catalog::Catalog;
use crate::config::{Config, EngineConfig};
use crate::error::{Error, Result};
use crate::mapping::{self, OverrideMapping};
use crate::phases::guard::{self, GuardMode, GuardReport, Snapshot};
use crate::phases::materialize::{self, PatchOutcome, PatchStatus, PreparedOverlay, SweepOutcome};
use crate::phases::publish::{self, PublishReport, PublishTarget};

/// Which tree the downstream step ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Overlay,
    Direct,
}

/// Everything a run did, as reported to the user.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: RunMode,
    /// The tree handed to the downstream step.
    pub tree: PathBuf,
    pub patches: Vec<PatchOutcome>,
    pub sweeps: Vec<SweepOutcome>,
    pub published: Vec<PathBuf>,
    pub anchor_missing: Vec<String>,
    pub registration: Option<PathBuf>,
    /// Guard result for the checkout at the end of the run.
    pub guard: Option<GuardReport>,
}

/// Per-status tallies of catalog outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub applied: usize,
    pub fallback: usize,
    pub failed: usize,
    pub anchor_missing: usize,
    pub skipped: usize,
}

impl RunSummary {
    /// Whether the run satisfies the exit contract: every catalog entry
    /// resolved and, in direct mode, a clean checkout afterwards.
    pub fn is_success(&self) -> bool {
        let resolved = self.patches.iter().all(PatchOutcome::is_resolved);
        let clean = match self.mode {
            RunMode::Overlay => true,
            RunMode::Direct => self.guard.as_ref().map_or(true, |g| g.clean),
        };
        resolved && clean
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for outcome in &self.patches {
            match outcome.status {
                PatchStatus::Applied => counts.applied += 1,
                PatchStatus::Fallback { .. } => counts.fallback += 1,
                PatchStatus::Failed { .. } => counts.failed += 1,
                PatchStatus::AnchorMissing { .. } => counts.anchor_missing += 1,
                PatchStatus::Skipped { .. } => counts.skipped += 1,
            }
        }
        counts
    }

    /// Outcomes that did not resolve, in catalog order.
    pub fn unresolved(&self) -> impl Iterator<Item = &PatchOutcome> {
        self.patches.iter().filter(|o| !o.is_resolved())
    }
}

/// A fatal error, together with what the run got through before it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RunFailure {
    pub error: Error,
    /// Outcomes recorded up to the failure.
    pub partial: Box<RunSummary>,
}

impl RunSummary {
    fn empty(mode: RunMode, tree: PathBuf) -> Self {
        Self {
            mode,
            tree,
            patches: Vec::new(),
            sweeps: Vec::new(),
            published: Vec::new(),
            anchor_missing: Vec::new(),
            registration: None,
            guard: None,
        }
    }

    fn absorb(&mut self, report: PublishReport) {
        self.published = report.published;
        self.anchor_missing = report.anchor_missing;
        self.registration = report.registration;
        if report.guard.is_some() {
            self.guard = report.guard;
        }
    }
}

/// Run the pipeline with no downstream step.
pub fn execute(config: &Config) -> std::result::Result<RunSummary, RunFailure> {
    execute_with(config, |_| Ok(()))
}

/// Run the pipeline, then `downstream` against the resulting tree.
///
/// A fatal error carries the partial summary, so callers can still report
/// which entries were applied, failed or never attempted.
pub fn execute_with<F>(config: &Config, downstream: F) -> std::result::Result<RunSummary, RunFailure>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let engine = &config.engine;
    let mut summary = match engine.overlay_root() {
        Some(root) => RunSummary::empty(RunMode::Overlay, root),
        None => RunSummary::empty(RunMode::Direct, engine.source_root.clone()),
    };

    match run(config, downstream, &mut summary) {
        Ok(()) => Ok(summary),
        Err(error) => Err(RunFailure {
            error,
            partial: Box::new(summary),
        }),
    }
}

fn run<F>(config: &Config, downstream: F, summary: &mut RunSummary) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let engine = &config.engine;
    let registry = &config.registry;

    let catalog = Catalog::scan(&engine.catalog_dir, &engine.patch_suffix)?;
    let mappings = load_mappings(engine)?;
    info!(
        "{} patch(es), {} override(s), {} transform(s)",
        catalog.len(),
        mappings.len(),
        registry.len()
    );

    let mut report = PublishReport::default();
    match summary.mode {
        RunMode::Overlay => {
            summary.patches =
                materialize::skip_catalog(&catalog, "overlay was not materialized");
            let before = Snapshot::capture(&engine.source_root)?;
            let root = materialize::mirror_source(engine, &summary.tree)?;
            summary.tree = root.clone();

            summary.patches = materialize::apply_catalog(&root, &catalog, registry)?;
            summary.sweeps = materialize::run_sweeps(&root, registry)?;
            materialize::validate_markers(&root, &engine.build_markers)?;

            let target = PublishTarget::Overlay(root);
            let published =
                publish::publish_into(&mappings, &target, registry, engine, downstream, &mut report);
            summary.absorb(report);
            published?;

            let guard = guard::check_since(&before)?;
            guard::enforce(&guard, GuardMode::Warn, engine.guard_listing_cap)?;
            summary.guard = Some(guard);
        }
        RunMode::Direct => {
            if !catalog.is_empty() {
                warn!(
                    "Overlay mode is disabled; {} catalog patch(es) are not applied to the checkout",
                    catalog.len()
                );
            }
            summary.patches = materialize::skip_catalog(&catalog, "overlay mode is disabled");
            let published = publish::publish_into(
                &mappings,
                &PublishTarget::Direct,
                registry,
                engine,
                downstream,
                &mut report,
            );
            summary.absorb(report);
            published?;
        }
    }
    Ok(())
}

/// Materialize the overlay without publishing overrides.
pub fn execute_prepare(config: &Config) -> Result<PreparedOverlay> {
    let engine = &config.engine;
    let catalog = Catalog::scan(&engine.catalog_dir, &engine.patch_suffix)?;
    materialize::prepare(engine, &catalog, &config.registry)
}

/// Parse the configured override mapping list, if any.
pub fn load_mappings(engine: &EngineConfig) -> Result<Vec<OverrideMapping>> {
    match &engine.override_list {
        Some(list) => mapping::from_file(list),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverlayMode;
    use crate::phases::guard::test_repo::{git_available, init_with};
    use crate::transforms::TransformRegistry;
    use std::fs;
    use tempfile::TempDir;

    const SETUP: &str = "from setuptools import setup\nsetup(name='demo')\n";
    const PATCH: &str = "--- a/setup.py\n+++ b/setup.py\n@@ -1,2 +1,2 @@\n from setuptools import setup\n-setup(name='demo')\n+setup(name='demo-patched')\n";

    fn setup(temp: &TempDir) -> Config {
        let source = temp.path().join("checkout");
        fs::create_dir_all(&source).unwrap();
        init_with(&source, &[("setup.py", SETUP), ("pkg/__init__.py", "")]);

        let patches = temp.path().join("patches");
        fs::create_dir_all(&patches).unwrap();
        fs::write(patches.join("0001-rename.patch"), PATCH).unwrap();

        let overrides = temp.path().join("overrides");
        fs::create_dir_all(overrides.join("pkg")).unwrap();
        fs::write(overrides.join("pkg/__init__.py"), "OVERRIDDEN = True\n").unwrap();
        let list = temp.path().join("overrides.txt");
        fs::write(&list, "pkg/__init__.py\n").unwrap();

        let mut engine = EngineConfig::new(&source);
        engine.catalog_dir = patches;
        engine.overrides_root = overrides;
        engine.override_list = Some(list);
        Config {
            engine,
            registry: TransformRegistry::new(),
        }
    }

    fn setup_without_git(temp: &TempDir) -> Config {
        let source = temp.path().join("checkout");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("setup.py"), SETUP).unwrap();
        let patches = temp.path().join("patches");
        fs::create_dir_all(&patches).unwrap();
        fs::write(patches.join("0001-rename.patch"), PATCH).unwrap();

        let mut engine = EngineConfig::new(&source);
        engine.catalog_dir = patches;
        Config {
            engine,
            registry: TransformRegistry::new(),
        }
    }

    #[test]
    fn test_overlay_run_leaves_checkout_clean() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let mut config = setup(&temp);
        let overlay = temp.path().join("overlay");
        config.engine.overlay = OverlayMode::Explicit(overlay.clone());

        let mut seen = None;
        let summary = execute_with(&config, |tree| {
            seen = Some(fs::read_to_string(tree.join("pkg/__init__.py"))?);
            Ok(())
        })
        .unwrap();

        assert_eq!(summary.mode, RunMode::Overlay);
        assert!(summary.is_success());
        assert_eq!(summary.counts().applied, 1);
        assert_eq!(seen.as_deref(), Some("OVERRIDDEN = True\n"));
        assert_eq!(
            fs::read_to_string(summary.tree.join("setup.py")).unwrap(),
            "from setuptools import setup\nsetup(name='demo-patched')\n"
        );
        assert!(summary.guard.unwrap().clean);
        assert!(guard::check(&config.engine.source_root).unwrap().clean);
        assert_eq!(
            fs::read_to_string(config.engine.source_root.join("setup.py")).unwrap(),
            SETUP
        );
    }

    #[test]
    fn test_direct_run_skips_catalog_and_restores() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let config = setup(&temp);

        let mut seen = None;
        let summary = execute_with(&config, |tree| {
            seen = Some(fs::read_to_string(tree.join("pkg/__init__.py"))?);
            Ok(())
        })
        .unwrap();

        assert_eq!(summary.mode, RunMode::Direct);
        assert_eq!(summary.tree, config.engine.source_root);
        assert_eq!(seen.as_deref(), Some("OVERRIDDEN = True\n"));
        assert_eq!(summary.counts().skipped, 1);
        assert!(!summary.is_success());
        assert_eq!(summary.unresolved().count(), 1);
        assert!(summary.guard.as_ref().unwrap().clean);
        assert_eq!(
            fs::read_to_string(config.engine.source_root.join("pkg/__init__.py")).unwrap(),
            ""
        );
    }

    #[test]
    fn test_missing_build_marker_keeps_partial_summary() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let mut config = setup(&temp);
        config.engine.overlay = OverlayMode::Explicit(temp.path().join("overlay"));
        config.engine.build_markers = vec!["pyproject.toml".to_string()];

        let mut ran = false;
        let failure = execute_with(&config, |_| {
            ran = true;
            Ok(())
        })
        .unwrap_err();

        assert!(!ran);
        assert!(matches!(failure.error, Error::OverlayIntegrity { .. }));
        assert_eq!(failure.to_string(), failure.error.to_string());
        let partial = failure.partial;
        assert_eq!(partial.mode, RunMode::Overlay);
        assert_eq!(partial.counts().applied, 1);
        assert!(partial.published.is_empty());
        assert!(partial.guard.is_none());
    }

    #[test]
    fn test_unclaimable_root_reports_catalog_as_skipped() {
        let temp = TempDir::new().unwrap();
        let mut config = setup_without_git(&temp);
        let overlay = temp.path().join("overlay");
        fs::create_dir_all(&overlay).unwrap();
        fs::write(overlay.join("precious.txt"), "keep\n").unwrap();
        config.engine.overlay = OverlayMode::Explicit(overlay.clone());

        let failure = execute(&config).unwrap_err();
        assert!(matches!(failure.error, Error::OverlayIntegrity { .. }));
        assert_eq!(failure.partial.counts().skipped, 1);
        assert!(overlay.join("precious.txt").exists());
    }

    #[test]
    fn test_summary_serializes_to_json() {
        let summary = RunSummary {
            mode: RunMode::Overlay,
            tree: PathBuf::from("/overlay"),
            patches: vec![PatchOutcome {
                id: "0001-a".to_string(),
                ordinal: 0,
                status: PatchStatus::Fallback {
                    transform: "env".to_string(),
                },
            }],
            sweeps: vec![],
            published: vec![],
            anchor_missing: vec![],
            registration: None,
            guard: None,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["mode"], "overlay");
        assert_eq!(json["patches"][0]["status"], "fallback");
        assert_eq!(json["patches"][0]["transform"], "env");
        assert!(summary.is_success());
    }
}
