//! # Overlay Patch Library
//!
//! This library turns a pristine, version-controlled source checkout into a
//! patched, build-ready tree without ever mutating the checkout itself. It
//! is designed to be used by the `overlay-patch` command-line tool, but the
//! pipeline is fully usable as a library: every component receives its
//! settings explicitly through [`config::EngineConfig`].
//!
//! ## Quick Example
//!
//! ```
//! use overlay_patch::transforms::reductions::rewrite_source;
//! use overlay_patch::transforms::ReductionOp;
//!
//! let src = "BlockReduce(tmp).Sum(v, n);";
//! let rewritten = rewrite_source(src, &ReductionOp::cub_defaults()).unwrap();
//! assert_eq!(rewritten, "BlockReduce(tmp).Reduce(v, cuda::std::plus<>(), n);");
//!
//! // Canonical call sites are left alone.
//! assert!(rewrite_source(&rewritten, &ReductionOp::cub_defaults()).is_none());
//! ```
//!
//! ## Core Concepts
//!
//! - **Patch Catalog (`catalog`)**: Unified diffs read from a directory and
//!   applied in lexical file-name order.
//! - **Override Mapping (`mapping`)**: Whole files copied over the tree, each
//!   optionally followed by named transforms.
//! - **Transforms (`transforms`)**: Idempotent text rewrites used as fallbacks
//!   for stale patches, as override post-processing, and as sweeps.
//! - **Phases (`phases`)**: Materialization into an overlay root, publishing,
//!   and the dirty-tree guard that keeps the checkout pristine.
//!
//! ## Execution Flow
//!
//! The main entry point is `phases::orchestrator`:
//!
//! 1.  **Materialize**: Mirror the checkout into the overlay root, apply the
//!     catalog (with fallbacks), run sweeps and validate the result.
//! 2.  **Publish**: Copy override files, run their transforms and register
//!     the overlay on the runtime search path.
//! 3.  **Guard**: Confirm no tracked file of the checkout changed.
//!
//! With the overlay disabled, overrides are published onto the checkout for
//! the duration of the downstream step and restored afterwards.

pub mod apply;
pub mod catalog;
pub mod config;
pub mod defaults;
pub mod error;
pub mod git;
pub mod mapping;
pub mod normalize;
pub mod output;
pub mod phases;
pub mod tail;
pub mod transforms;

pub use error::{Error, Result};

#[cfg(test)]
mod catalog_proptest;
