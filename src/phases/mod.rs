//! Stages of an overlay-patch run.
//!
//! ## Overview
//!
//! A run goes through these stages:
//! 1. Materialize - mirror the checkout into the overlay root and apply the catalog
//! 2. Publish - copy override files into the overlay (or onto the checkout) and
//!    run their transforms
//! 3. Guard - confirm the checkout's tracked files were left alone
//!
//! The orchestrator wires them together and produces the run summary.

pub mod guard;
pub mod materialize;
pub mod orchestrator;
pub mod publish;

pub use guard::{GuardMode, GuardReport, Snapshot};
pub use materialize::{PatchOutcome, PatchStatus, PreparedOverlay, SweepOutcome};
pub use orchestrator::{RunMode, RunSummary};
pub use publish::{PublishReport, PublishTarget};
