//! # Configuration Schema and Parsing
//!
//! This module defines the `.overlay-patch.yaml` file format and resolves it
//! into the explicit values every engine component receives. Components
//! never read the process environment themselves; the CLI layer is the only
//! place where flags and environment variables are folded in.
//!
//! ## Key Components
//!
//! - **`ConfigFile`**: The raw, deserialized form of the YAML file. Every
//!   field is optional so a minimal file (or none at all) works.
//! - **`EngineConfig`**: Fully resolved settings with absolute paths, threaded
//!   through the materializer, publisher and guard.
//! - **`OverlayMode`**: The overlay toggle: disabled, enabled at the default
//!   location, or enabled at an explicit path.
//! - **`Config`**: An `EngineConfig` plus the transform registry built from
//!   the `transforms`, `fallbacks` and `sweeps` sections.
//!
//! ## Example
//!
//! ```yaml
//! source_root: .
//! patches: patches
//! overrides:
//!   root: overrides
//!   list: overrides.txt
//! overlay: default
//! transforms:
//!   - name: env-preference
//!     kind: env-fallback
//!     target: pkg/envs.py
//!     old: OLD_NAME
//!     new: NEW_NAME
//!   - name: reductions
//!     kind: reduction-sweep
//!     target: csrc
//! fallbacks:
//!   0003-env-rename: env-preference
//! sweeps: [reductions]
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};
use crate::transforms::{
    EnvFallbackOp, GuardBlockOp, Procedure, ReductionKind, ReductionOp, ReductionSweepOp,
    TransformDescriptor, TransformRegistry,
};

/// Where (and whether) an overlay root is materialized.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OverlayMode {
    /// Publish directly onto the live checkout.
    #[default]
    Disabled,
    /// Materialize into the platform cache directory.
    DefaultLocation,
    /// Materialize into the given directory.
    Explicit(PathBuf),
}

impl OverlayMode {
    /// The overlay root this mode resolves to, if any.
    pub fn root(&self) -> Option<PathBuf> {
        match self {
            OverlayMode::Disabled => None,
            OverlayMode::DefaultLocation => Some(defaults::default_overlay_root()),
            OverlayMode::Explicit(path) => Some(path.clone()),
        }
    }

    /// Whether an overlay is used at all
    pub fn is_enabled(&self) -> bool {
        !matches!(self, OverlayMode::Disabled)
    }
}

impl FromStr for OverlayMode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim() {
            "" => Err("overlay mode must not be empty".to_string()),
            "off" | "disabled" | "false" | "0" | "no" => Ok(OverlayMode::Disabled),
            "default" | "on" | "enabled" | "true" | "1" | "yes" => {
                Ok(OverlayMode::DefaultLocation)
            }
            path => Ok(OverlayMode::Explicit(PathBuf::from(path))),
        }
    }
}

/// Override file locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverridesSection {
    /// Directory override sources are read from.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Mapping list file.
    #[serde(default)]
    pub list: Option<PathBuf>,
}

/// Downstream search-path registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchPathSection {
    /// Directory the consuming runtime scans for path marker files.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Marker file name.
    #[serde(default)]
    pub marker: Option<String>,
}

/// One entry of the `ops` table of a reduction sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReductionOpSpec {
    /// `sum`, `max` or `min`.
    pub op: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub functor: Option<String>,
    #[serde(default)]
    pub combiner: Option<String>,
}

/// A transform as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformSpec {
    pub name: String,
    /// `env-fallback`, `reduction-sweep` or `guard-block-removal`.
    pub kind: String,
    /// File or subtree the transform edits, relative to the tree root.
    pub target: PathBuf,
    #[serde(default)]
    pub old: Option<String>,
    #[serde(default)]
    pub new: Option<String>,
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    #[serde(default)]
    pub ops: Option<Vec<ReductionOpSpec>>,
    #[serde(default)]
    pub head: Option<String>,
    #[serde(default)]
    pub tail: Option<String>,
}

/// Raw `.overlay-patch.yaml` contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub source_root: Option<PathBuf>,
    /// Patch catalog directory.
    #[serde(default)]
    pub patches: Option<PathBuf>,
    #[serde(default)]
    pub patch_suffix: Option<String>,
    #[serde(default)]
    pub overrides: OverridesSection,
    /// `off`, `default`, or a directory path.
    #[serde(default)]
    pub overlay: Option<String>,
    #[serde(default)]
    pub guard_listing_cap: Option<usize>,
    #[serde(default)]
    pub search_path: SearchPathSection,
    #[serde(default)]
    pub build_markers: Option<Vec<String>>,
    /// Extra glob patterns excluded from the mirror.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub transforms: Vec<TransformSpec>,
    /// Patch id to fallback transform name.
    #[serde(default)]
    pub fallbacks: BTreeMap<String, String>,
    /// Transforms re-run on every materialization.
    #[serde(default)]
    pub sweeps: Vec<String>,
}

/// Resolved settings threaded through every engine component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// The pristine checkout.
    pub source_root: PathBuf,
    /// Patch catalog directory.
    pub catalog_dir: PathBuf,
    pub patch_suffix: String,
    /// Directory override sources are read from.
    pub overrides_root: PathBuf,
    /// Mapping list, if overrides are used.
    pub override_list: Option<PathBuf>,
    pub overlay: OverlayMode,
    /// Maximum number of paths listed by a dirty-tree warning.
    pub guard_listing_cap: usize,
    /// Where the search-path marker is written. Registration is skipped when unset.
    pub search_path_dir: Option<PathBuf>,
    pub search_path_marker: String,
    /// At least one must exist at the top of a materialized overlay.
    pub build_markers: Vec<String>,
    /// Extra glob patterns excluded from the mirror.
    pub exclude: Vec<String>,
}

impl EngineConfig {
    /// Defaults for a checkout at `source_root`, with catalog and overrides
    /// in `patches/` and `overrides/` beneath it.
    pub fn new<P: Into<PathBuf>>(source_root: P) -> Self {
        let source_root = source_root.into();
        Self {
            catalog_dir: source_root.join("patches"),
            patch_suffix: defaults::PATCH_SUFFIX.to_string(),
            overrides_root: source_root.join("overrides"),
            override_list: None,
            overlay: OverlayMode::Disabled,
            guard_listing_cap: defaults::GUARD_LISTING_CAP,
            search_path_dir: None,
            search_path_marker: defaults::SEARCH_PATH_MARKER.to_string(),
            build_markers: defaults::build_markers(),
            exclude: Vec::new(),
            source_root,
        }
    }

    /// The overlay root for the current mode, if enabled.
    pub fn overlay_root(&self) -> Option<PathBuf> {
        self.overlay.root()
    }
}

/// Engine settings plus the transforms they reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub registry: TransformRegistry,
}

/// Parse a YAML document, resolving relative paths against `base_dir`.
pub fn parse(yaml_content: &str, base_dir: &Path) -> Result<Config> {
    let raw: ConfigFile = if yaml_content.trim().is_empty() {
        ConfigFile::default()
    } else {
        serde_yaml::from_str(yaml_content).map_err(|e| Error::ConfigParse {
            message: e.to_string(),
            hint: Some("See the example at the top of the config module documentation".to_string()),
        })?
    };
    resolve(raw, base_dir)
}

/// Load a configuration file.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let base_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    parse(&content, &base_dir)
}

/// Turn a raw file into resolved settings and a populated registry.
pub fn resolve(raw: ConfigFile, base_dir: &Path) -> Result<Config> {
    let at = |p: &Path| {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            base_dir.join(p)
        }
    };

    let source_root = raw
        .source_root
        .as_deref()
        .map(at)
        .unwrap_or_else(|| base_dir.to_path_buf());
    let mut engine = EngineConfig::new(source_root);

    if let Some(patches) = &raw.patches {
        engine.catalog_dir = at(patches);
    } else {
        engine.catalog_dir = base_dir.join("patches");
    }
    if let Some(suffix) = raw.patch_suffix {
        if suffix.is_empty() {
            return Err(Error::ConfigParse {
                message: "patch_suffix must not be empty".to_string(),
                hint: Some("Use a suffix such as '.patch' or '.diff'".to_string()),
            });
        }
        engine.patch_suffix = suffix;
    }
    engine.overrides_root = at(raw
        .overrides
        .root
        .as_deref()
        .unwrap_or(Path::new("overrides")));
    engine.override_list = raw.overrides.list.as_deref().map(at);

    if let Some(overlay) = &raw.overlay {
        engine.overlay = match overlay.parse::<OverlayMode>() {
            Ok(OverlayMode::Explicit(path)) => OverlayMode::Explicit(at(&path)),
            Ok(mode) => mode,
            Err(message) => {
                return Err(Error::ConfigParse {
                    message,
                    hint: Some("Use 'off', 'default', or a directory path".to_string()),
                })
            }
        };
    }
    if let Some(cap) = raw.guard_listing_cap {
        engine.guard_listing_cap = cap;
    }
    engine.search_path_dir = raw.search_path.dir.as_deref().map(at);
    if let Some(marker) = raw.search_path.marker {
        engine.search_path_marker = marker;
    }
    if let Some(markers) = raw.build_markers {
        if markers.is_empty() {
            return Err(Error::ConfigParse {
                message: "build_markers must list at least one file".to_string(),
                hint: None,
            });
        }
        engine.build_markers = markers;
    }
    for pattern in &raw.exclude {
        glob::Pattern::new(pattern)?;
    }
    engine.exclude = raw.exclude;

    let mut registry = TransformRegistry::new();
    for spec in raw.transforms {
        registry.register(transform_from_spec(spec)?)?;
    }
    for (patch_id, transform) in &raw.fallbacks {
        registry.bind_fallback(patch_id, transform)?;
    }
    for sweep in &raw.sweeps {
        registry.add_sweep(sweep)?;
    }

    Ok(Config { engine, registry })
}

fn transform_from_spec(spec: TransformSpec) -> Result<TransformDescriptor> {
    let name = spec.name.clone();
    let missing = |field: &str| Error::ConfigParse {
        message: format!(
            "Transform '{}' ({}) is missing '{}'",
            name, spec.kind, field
        ),
        hint: None,
    };

    let procedure = match spec.kind.as_str() {
        "env-fallback" => Procedure::EnvFallback(EnvFallbackOp {
            old: spec.old.clone().ok_or_else(|| missing("old"))?,
            new: spec.new.clone().ok_or_else(|| missing("new"))?,
        }),
        "reduction-sweep" => {
            let ops = match &spec.ops {
                Some(ops) => ops
                    .iter()
                    .map(|op| reduction_op(&name, op))
                    .collect::<Result<Vec<_>>>()?,
                None => ReductionOp::cub_defaults(),
            };
            Procedure::ReductionSweep(ReductionSweepOp {
                extensions: spec
                    .extensions
                    .clone()
                    .unwrap_or_else(ReductionSweepOp::default_extensions),
                ops,
            })
        }
        "guard-block-removal" => Procedure::GuardBlockRemoval(GuardBlockOp {
            head: spec.head.clone().ok_or_else(|| missing("head"))?,
            tail: spec.tail.clone().ok_or_else(|| missing("tail"))?,
        }),
        other => {
            return Err(Error::ConfigParse {
                message: format!("Transform '{}' has unknown kind '{}'", name, other),
                hint: Some(
                    "Known kinds: env-fallback, reduction-sweep, guard-block-removal".to_string(),
                ),
            })
        }
    };

    crate::mapping::relative_path(&spec.target.to_string_lossy()).map_err(|message| {
        Error::ConfigParse {
            message: format!("Transform '{}' target {}", name, message),
            hint: None,
        }
    })?;

    Ok(TransformDescriptor {
        name: spec.name,
        target: spec.target,
        procedure,
    })
}

fn reduction_op(transform: &str, spec: &ReductionOpSpec) -> Result<ReductionOp> {
    let kind = ReductionKind::from_name(&spec.op).ok_or_else(|| Error::ConfigParse {
        message: format!(
            "Transform '{}' has unknown reduction '{}'",
            transform, spec.op
        ),
        hint: Some("Known reductions: sum, max, min".to_string()),
    })?;
    let base = ReductionOp::cub(kind);
    let op = ReductionOp {
        kind,
        method: spec.method.clone().unwrap_or(base.method),
        functor: spec.functor.clone().unwrap_or(base.functor),
        combiner: spec.combiner.clone().unwrap_or(base.combiner),
    };
    if !op.is_fixed_point() {
        return Err(Error::ConfigParse {
            message: format!(
                "Transform '{}': combiner '{}' would be rewritten again",
                transform, op.combiner
            ),
            hint: Some("The combiner must differ from the old call shapes".to_string()),
        });
    }
    Ok(op)
}
