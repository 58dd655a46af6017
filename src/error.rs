//! # Error Handling
//!
//! This module defines the centralized error type for the `overlay-patch`
//! engine. It uses the `thiserror` library to build a single `Error` enum
//! covering every anticipated failure mode, each with enough context to
//! tell the user what was attempted.
//!
//! ## Fatal and local failures
//!
//! The engine distinguishes two classes of failure:
//!
//! - **Local** failures (`PatchApplication`, `TransformAnchorMissing`) concern a
//!   single catalog entry. The materializer records them in the run summary
//!   and keeps going, so one stale patch never blocks the rest of the set.
//!   They still exist as error variants so callers that apply a single
//!   descriptor can propagate them with `?`.
//! - **Fatal** failures (`OverlayIntegrity`, `DirtyTree`) mean the core safety
//!   invariant was violated: the overlay is unusable or the pristine checkout
//!   was modified. These abort the pipeline immediately.
//!
//! Everything else (configuration, I/O, git invocation) is fatal as well,
//! since the engine cannot meaningfully continue without its inputs.

use thiserror::Error;

/// Main error type for overlay-patch operations
#[derive(Error, Debug)]
pub enum Error {
    /// A diff failed strict application and no fallback transform is
    /// registered for its identity.
    #[error("Patch application failed: {patch} - {message}")]
    PatchApplication { patch: String, message: String },

    /// A registered transform could not find the text it edits, which
    /// usually means the underlying tree drifted.
    #[error("Transform anchor missing: {transform} in {target}")]
    TransformAnchorMissing { transform: String, target: String },

    /// The mirrored tree is missing its build-descriptor marker, so the
    /// mirror is treated as failed or interrupted.
    #[error("Overlay integrity failure at {root}: {message}")]
    OverlayIntegrity { root: String, message: String },

    /// Tracked files changed when a stage promised they would not.
    #[error("Tracked files modified in {root}: {}", paths.join(", "))]
    DirtyTree { root: String, paths: Vec<String> },

    /// An error occurred while parsing the `.overlay-patch.yaml` file.
    ///
    /// This error includes the specific parsing issue and optionally a hint
    /// about how to fix it.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// A line of the override mapping list could not be parsed.
    #[error("Override mapping error on line {line}: {message}")]
    MappingParse { line: usize, message: String },

    /// The patch catalog directory could not be read or is inconsistent.
    #[error("Patch catalog error: {message}")]
    Catalog { message: String },

    /// A mapping or fallback refers to a transform that is not registered.
    #[error("Unknown transform: {name}")]
    UnknownTransform { name: String },

    /// An error occurred while executing a Git command.
    #[error("Git command failed in {root}: {command} - {stderr}")]
    GitCommand {
        command: String,
        root: String,
        stderr: String,
    },

    /// The downstream step run against the published tree failed.
    #[error("Downstream step failed: {command} - {message}")]
    Downstream { command: String, message: String },

    /// An error occurred while reading or writing the on-disk trees.
    #[error("Filesystem operation error: {message}")]
    Filesystem { message: String },

    /// An error occurred with a path-related operation.
    #[error("Path operation error: {message}")]
    Path { message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// An error occurred during serialization.
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl Error {
    /// Whether this error must abort the pipeline.
    ///
    /// Only patch-level failures are local; they are aggregated into the run
    /// summary instead.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::PatchApplication { .. } | Error::TransformAnchorMissing { .. }
        )
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
