//! Deterministic transform registry
//!
//! Transforms are targeted, idempotent text rewrites. They serve two roles:
//!
//! - **Fallbacks** for catalog patches that no longer apply strictly. Each
//!   patch identity may be bound to exactly one transform that achieves the
//!   same effect by inspecting the current content.
//! - **Override transforms** named on a line of the override mapping list,
//!   run against that mapping's destination file after it is copied.
//!
//! A transform may also be listed as a **sweep**, in which case the
//! materializer re-runs it on every invocation. Sweeps must reach a fixed
//! point: running one over its own output changes nothing.
//!
//! Every procedure checks for its canonical marker before editing, so a
//! second run is always a no-op.

pub mod env_fallback;
pub mod guard_block;
pub mod reductions;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;

use crate::error::{Error, Result};

pub use env_fallback::EnvFallbackOp;
pub use guard_block::GuardBlockOp;
pub use reductions::{ReductionKind, ReductionOp, ReductionSweepOp};

/// The edit a transform performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Procedure {
    /// Make an assignment prefer a new environment variable over an old one.
    EnvFallback(EnvFallbackOp),
    /// Rewrite reduction call sites across a subtree to one canonical shape.
    ReductionSweep(ReductionSweepOp),
    /// Remove a multi-line guard block between two anchors.
    GuardBlockRemoval(GuardBlockOp),
}

impl Procedure {
    /// Short kind name, matching the `kind:` key of the configuration file.
    pub fn kind(&self) -> &'static str {
        match self {
            Procedure::EnvFallback(_) => "env-fallback",
            Procedure::ReductionSweep(_) => "reduction-sweep",
            Procedure::GuardBlockRemoval(_) => "guard-block-removal",
        }
    }
}

/// A named transform and the path it edits by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformDescriptor {
    /// Registry key, referenced by fallbacks, sweeps and override mappings.
    pub name: String,
    /// Path relative to the tree root. A file, or a subtree for sweeps.
    pub target: PathBuf,
    /// What the transform does.
    pub procedure: Procedure,
}

/// What running a transform did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum TransformOutcome {
    /// Content was rewritten in this many files.
    Changed { files: usize },
    /// The canonical form was already present.
    Unchanged,
    /// The text or path the transform edits does not exist.
    AnchorMissing,
}

/// Apply one transform to `root.join(target)`.
pub fn apply(descriptor: &TransformDescriptor, root: &Path, target: &Path) -> Result<TransformOutcome> {
    let path = root.join(target);
    let outcome = match &descriptor.procedure {
        Procedure::EnvFallback(op) => env_fallback::apply(op, &path)?,
        Procedure::ReductionSweep(op) => reductions::apply(op, &path)?,
        Procedure::GuardBlockRemoval(op) => guard_block::apply(op, &path)?,
    };
    debug!(
        "transform '{}' ({}) on {}: {:?}",
        descriptor.name,
        descriptor.procedure.kind(),
        target.display(),
        outcome
    );
    Ok(outcome)
}

/// Registered transforms plus their bindings to patch identities.
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    transforms: BTreeMap<String, TransformDescriptor>,
    fallbacks: BTreeMap<String, String>,
    sweeps: Vec<String>,
}

impl TransformRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform under its name. Names must be unique.
    pub fn register(&mut self, descriptor: TransformDescriptor) -> Result<()> {
        if self.transforms.contains_key(&descriptor.name) {
            return Err(Error::ConfigParse {
                message: format!("Transform '{}' is defined twice", descriptor.name),
                hint: Some("Each transform name must be unique".to_string()),
            });
        }
        self.transforms.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Bind a patch identity to the transform used when it fails to apply.
    ///
    /// A patch may be paired with exactly one transform.
    pub fn bind_fallback(&mut self, patch_id: &str, transform: &str) -> Result<()> {
        self.require(transform)?;
        if let Some(existing) = self.fallbacks.get(patch_id) {
            return Err(Error::ConfigParse {
                message: format!(
                    "Patch '{}' already falls back to '{}', cannot also bind '{}'",
                    patch_id, existing, transform
                ),
                hint: None,
            });
        }
        self.fallbacks
            .insert(patch_id.to_string(), transform.to_string());
        Ok(())
    }

    /// Mark a transform to be re-run on every materialization.
    pub fn add_sweep(&mut self, transform: &str) -> Result<()> {
        self.require(transform)?;
        if !self.sweeps.iter().any(|s| s == transform) {
            self.sweeps.push(transform.to_string());
        }
        Ok(())
    }

    /// Look up a transform by name
    pub fn get(&self, name: &str) -> Option<&TransformDescriptor> {
        self.transforms.get(name)
    }

    /// The fallback registered for a patch identity, if any.
    pub fn fallback_for(&self, patch_id: &str) -> Option<&TransformDescriptor> {
        self.fallbacks
            .get(patch_id)
            .and_then(|name| self.transforms.get(name))
    }

    /// Sweep transforms in registration order.
    pub fn sweeps(&self) -> impl Iterator<Item = &TransformDescriptor> {
        self.sweeps.iter().filter_map(|name| self.transforms.get(name))
    }

    /// Number of registered transforms
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Whether no transform is registered
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Run a transform against its own default target.
    pub fn run(&self, name: &str, root: &Path) -> Result<TransformOutcome> {
        let descriptor = self.require(name)?;
        apply(descriptor, root, &descriptor.target)
    }

    /// Run a transform against an explicit target instead of its default.
    pub fn run_on(&self, name: &str, root: &Path, target: &Path) -> Result<TransformOutcome> {
        let descriptor = self.require(name)?;
        apply(descriptor, root, target)
    }

    fn require(&self, name: &str) -> Result<&TransformDescriptor> {
        self.transforms
            .get(name)
            .ok_or_else(|| Error::UnknownTransform {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn env_transform(name: &str, target: &str) -> TransformDescriptor {
        TransformDescriptor {
            name: name.to_string(),
            target: PathBuf::from(target),
            procedure: Procedure::EnvFallback(EnvFallbackOp {
                old: "OLD_NAME".to_string(),
                new: "NEW_NAME".to_string(),
            }),
        }
    }

    #[test]
    fn test_register_rejects_duplicate_names() {
        let mut registry = TransformRegistry::new();
        registry.register(env_transform("env", "a.py")).unwrap();
        let err = registry.register(env_transform("env", "b.py")).unwrap_err();
        assert!(err.to_string().contains("defined twice"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_fallback_binding_is_one_to_one() {
        let mut registry = TransformRegistry::new();
        registry.register(env_transform("env", "a.py")).unwrap();
        registry.register(env_transform("env2", "b.py")).unwrap();

        registry.bind_fallback("0001-env", "env").unwrap();
        assert!(registry.bind_fallback("0001-env", "env2").is_err());
        assert_eq!(registry.fallback_for("0001-env").unwrap().name, "env");
        assert!(registry.fallback_for("0002-other").is_none());
    }

    #[test]
    fn test_unknown_transform_names_are_rejected() {
        let mut registry = TransformRegistry::new();
        assert!(matches!(
            registry.bind_fallback("0001", "missing"),
            Err(Error::UnknownTransform { .. })
        ));
        assert!(matches!(
            registry.add_sweep("missing"),
            Err(Error::UnknownTransform { .. })
        ));
        assert!(matches!(
            registry.run("missing", Path::new(".")),
            Err(Error::UnknownTransform { .. })
        ));
    }

    #[test]
    fn test_sweeps_are_deduplicated_in_order() {
        let mut registry = TransformRegistry::new();
        registry.register(env_transform("b", "b.py")).unwrap();
        registry.register(env_transform("a", "a.py")).unwrap();
        registry.add_sweep("b").unwrap();
        registry.add_sweep("a").unwrap();
        registry.add_sweep("b").unwrap();

        let names: Vec<_> = registry.sweeps().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_run_on_overrides_default_target() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("other.py"), "conf = readEnv(\"OLD_NAME\", \"\")\n").unwrap();

        let mut registry = TransformRegistry::new();
        registry.register(env_transform("env", "missing.py")).unwrap();

        assert_eq!(
            registry.run("env", temp.path()).unwrap(),
            TransformOutcome::AnchorMissing
        );
        assert_eq!(
            registry
                .run_on("env", temp.path(), Path::new("other.py"))
                .unwrap(),
            TransformOutcome::Changed { files: 1 }
        );
    }
}
